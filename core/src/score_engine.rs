//! Score engine: turns joined statistics rows into score records.
//!
//! Pure: no I/O, no clock, no randomness. The same rows and baseline always
//! produce the same records.

use crate::{
    config::{CompetitionBaseline, ScoreWeights, ScoringConfig},
    join_view::JoinedRow,
    types::{CellId, IndustryCode},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_SURVIVAL: f64 = 0.10;
pub const MAX_SURVIVAL: f64 = 0.95;

/// Sales figures are reported in units of 10,000 currency units.
pub const SALES_DISPLAY_UNIT: f64 = 10_000.0;

// ── Risk flags ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub level:   RiskLevel,
    pub message: String,
}

impl RiskFlag {
    pub const OVERSATURATED: &'static str = "oversaturated";
    pub const ELEVATED_COMPETITION: &'static str = "elevated competition";
    pub const HIGH_RENT: &'static str = "high rent";
    pub const LOW_FOOT_TRAFFIC: &'static str = "low foot traffic";
    pub const HIGH_CLOSURE_RATE: &'static str = "high closure rate";
    pub const NO_DATA: &'static str = "no data at this location";

    pub fn warning(message: &str) -> Self {
        Self { level: RiskLevel::Warning, message: message.to_string() }
    }

    pub fn danger(message: &str) -> Self {
        Self { level: RiskLevel::Danger, message: message.to_string() }
    }
}

// ── Baseline ─────────────────────────────────────────────────────────────────

/// Citywide averages, computed once per score run over the latest snapshot
/// of every layer. A layer with no rows averages to 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub avg_count:      f64,
    pub avg_floating:   f64,
    pub avg_population: f64,
    pub avg_sales:      f64,
    pub avg_rent:       f64,
    /// Average competitor count per industry.
    #[serde(default)]
    pub industry_avg_count: BTreeMap<IndustryCode, f64>,
}

// ── Score record ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub cell_id:              CellId,
    pub industry_code:        IndustryCode,
    pub health_score:         f64,
    pub competition_index:    f64,
    pub survival_probability: f64,
    pub sales_estimate_low:   f64,
    pub sales_estimate_high:  f64,
    pub population_score:     f64,
    pub floating_score:       f64,
    pub rent_score:           f64,
    pub risk_flags:           Vec<RiskFlag>,
    pub period:               String,
}

/// Map `value` onto 0..100 by its deviation from `avg`.
///
/// 50 is the baseline; each half-average of deviation moves the score by
/// 20 points. A zero average has no meaningful deviation and yields 50.
pub fn z_to_score(value: f64, avg: f64, higher_is_better: bool) -> f64 {
    if avg == 0.0 {
        return 50.0;
    }
    let z = (value - avg) / (avg * 0.5).max(1.0);
    let score = (50.0 + 20.0 * z).clamp(0.0, 100.0);
    if higher_is_better {
        score
    } else {
        100.0 - score
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub struct ScoreEngine<'a> {
    config:  &'a ScoringConfig,
    weights: ScoreWeights,
}

impl<'a> ScoreEngine<'a> {
    /// Weights whose magnitudes sum to zero (or to NaN) are replaced by the
    /// defaults, so the weighted average is always defined.
    pub fn new(config: &'a ScoringConfig) -> Self {
        let weights = if config.weights.abs_sum() > 0.0 {
            config.weights.clone()
        } else {
            ScoreWeights::default()
        };
        Self { config, weights }
    }

    /// Score every row against one shared baseline.
    pub fn compute<'b, I>(
        &'b self,
        rows: I,
        baseline: &'b Baseline,
        period: &'b str,
    ) -> impl Iterator<Item = ScoreRecord> + 'b
    where
        I: IntoIterator<Item = JoinedRow>,
        I::IntoIter: 'b,
    {
        rows.into_iter().map(move |row| self.score_row(&row, baseline, period))
    }

    pub fn competition_index(&self, row: &JoinedRow, baseline: &Baseline) -> f64 {
        let avg = match self.config.competition_baseline {
            CompetitionBaseline::Citywide => baseline.avg_count,
            CompetitionBaseline::PerIndustry => baseline
                .industry_avg_count
                .get(&row.industry_code)
                .copied()
                .unwrap_or(0.0),
        };
        if avg == 0.0 {
            0.0
        } else {
            row.competitor_count as f64 / avg
        }
    }

    pub fn survival_probability(&self, row: &JoinedRow, baseline: &Baseline, competition_index: f64) -> f64 {
        let floating_adj = if row.floating_total > baseline.avg_floating { 0.05 } else { -0.03 };
        let pop_adj = if row.resident_population as f64 > baseline.avg_population { 0.03 } else { -0.02 };
        let competition_adj = if competition_index > 1.5 {
            -0.08
        } else if competition_index < 0.5 {
            0.03
        } else {
            0.0
        };
        ((1.0 - row.closure_rate) + floating_adj + pop_adj + competition_adj)
            .clamp(MIN_SURVIVAL, MAX_SURVIVAL)
    }

    pub fn score_row(&self, row: &JoinedRow, baseline: &Baseline, period: &str) -> ScoreRecord {
        let competition_index = self.competition_index(row, baseline);
        let survival = self.survival_probability(row, baseline, competition_index);

        let floating_score = z_to_score(row.floating_total, baseline.avg_floating, true);
        let population_score = z_to_score(row.resident_population as f64, baseline.avg_population, true);
        let rent_score = z_to_score(row.rent_per_area, baseline.avg_rent, false);
        let sales_score = z_to_score(row.quarterly_sales, baseline.avg_sales, true);

        let w = &self.weights;
        let competition_score = 100.0 - (competition_index * 50.0).min(100.0);
        let weighted = competition_score * w.competition.abs()
            + survival * 100.0 * w.survival.abs()
            + floating_score * w.floating.abs()
            + population_score * w.population.abs()
            + sales_score * w.sales.abs()
            + rent_score * w.rent.abs();
        let health_score = (weighted / w.abs_sum()).clamp(0.0, 100.0);

        let monthly_sales = row.quarterly_sales / 3.0;
        let sales_estimate_low = monthly_sales * 0.7 / SALES_DISPLAY_UNIT;
        let sales_estimate_high = monthly_sales * 1.3 / SALES_DISPLAY_UNIT;

        ScoreRecord {
            cell_id:              row.cell_id,
            industry_code:        row.industry_code.clone(),
            health_score:         round_to(health_score, 1),
            competition_index:    round_to(competition_index, 3),
            survival_probability: round_to(survival, 3),
            sales_estimate_low:   sales_estimate_low.round(),
            sales_estimate_high:  sales_estimate_high.round(),
            population_score:     round_to(population_score, 1),
            floating_score:       round_to(floating_score, 1),
            rent_score:           round_to(rent_score, 1),
            risk_flags:           risk_flags(row, baseline, competition_index),
            period:               period.to_string(),
        }
    }
}

/// Every applicable flag, in a fixed order. The two competition flags are
/// mutually exclusive; the rest are independent.
pub fn risk_flags(row: &JoinedRow, baseline: &Baseline, competition_index: f64) -> Vec<RiskFlag> {
    let mut flags = Vec::new();
    if competition_index > 2.0 {
        flags.push(RiskFlag::danger(RiskFlag::OVERSATURATED));
    } else if competition_index > 1.5 {
        flags.push(RiskFlag::warning(RiskFlag::ELEVATED_COMPETITION));
    }
    if row.rent_per_area > baseline.avg_rent * 1.5 {
        flags.push(RiskFlag::warning(RiskFlag::HIGH_RENT));
    }
    if row.floating_total < baseline.avg_floating * 0.5 {
        flags.push(RiskFlag::warning(RiskFlag::LOW_FOOT_TRAFFIC));
    }
    if row.closure_rate > 0.25 {
        flags.push(RiskFlag::danger(RiskFlag::HIGH_CLOSURE_RATE));
    }
    flags
}
