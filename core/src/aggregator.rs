//! Radius aggregator: rolls cell statistics and scores up to a circle.
//!
//! Read-only. Matching is two-stage: a degree-space bounding box narrows
//! the candidates in SQL, then each candidate rectangle is tested against
//! the circle in meters.

use crate::{
    error::{EngineError, EngineResult},
    geo,
    score_engine::{round_to, RiskFlag},
    store::GridStore,
    types::{CellId, LatLng},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Where the score fields of an `AnalysisResult` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Averaged over stored score records.
    Computed,
    /// Cells matched but none has been scored for the industry yet.
    Default,
    /// No cell intersects the circle.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub health_score:         f64,
    pub competition_index:    f64,
    pub survival_probability: f64,
    pub sales_estimate_low:   f64,
    pub sales_estimate_high:  f64,
    pub store_count:          i64,
    pub floating_population:  f64,
    pub resident_population:  i64,
    pub avg_rent_per_area:    f64,
    pub population_score:     f64,
    pub floating_score:       f64,
    pub rent_score:           f64,
    pub risk_flags:           Vec<RiskFlag>,
    pub grid_count:           usize,
    pub source:               ResultSource,
}

impl AnalysisResult {
    /// All-zero result for a location with no grid coverage.
    pub fn empty() -> Self {
        Self {
            health_score:         0.0,
            competition_index:    0.0,
            survival_probability: 0.0,
            sales_estimate_low:   0.0,
            sales_estimate_high:  0.0,
            store_count:          0,
            floating_population:  0.0,
            resident_population:  0,
            avg_rent_per_area:    0.0,
            population_score:     0.0,
            floating_score:       0.0,
            rent_score:           0.0,
            risk_flags:           vec![RiskFlag::warning(RiskFlag::NO_DATA)],
            grid_count:           0,
            source:               ResultSource::Empty,
        }
    }
}

const DEFAULT_HEALTH: f64 = 50.0;
const DEFAULT_SURVIVAL: f64 = 0.75;
const DEFAULT_SUB_SCORE: f64 = 50.0;

pub struct RadiusAggregator<'a> {
    store: &'a GridStore,
}

impl<'a> RadiusAggregator<'a> {
    pub fn new(store: &'a GridStore) -> Self {
        Self { store }
    }

    /// Ids of every cell whose rectangle intersects the circle.
    pub fn cells_within(&self, point: LatLng, radius_m: f64) -> EngineResult<Vec<CellId>> {
        validate(point, radius_m)?;
        let bbox = geo::circle_bbox(point, radius_m);
        let candidates = self.store.cells_in_bbox(&bbox)?;
        let total = candidates.len();
        let matched: Vec<CellId> = candidates
            .into_iter()
            .filter(|c| geo::circle_intersects_rect(point, radius_m, &c.bounds))
            .map(|c| c.cell_id)
            .collect();
        log::debug!("radius {radius_m}m: {} of {total} bbox candidates matched", matched.len());
        Ok(matched)
    }

    pub fn aggregate(
        &self,
        point: LatLng,
        radius_m: f64,
        industry_code: &str,
    ) -> EngineResult<AnalysisResult> {
        let cell_ids = self.cells_within(point, radius_m)?;
        if cell_ids.is_empty() {
            log::debug!("no cells within {radius_m}m of ({}, {})", point.lat, point.lng);
            return Ok(AnalysisResult::empty());
        }

        let grid_count = cell_ids.len();
        let stats = self.store.radius_stats(&cell_ids, industry_code)?;
        let floating_population = stats.avg_floating.round();
        let avg_rent_per_area = stats.avg_rent.round();

        let Some(summary) = self.store.score_summary(&cell_ids, industry_code)? else {
            return Ok(AnalysisResult {
                health_score:         DEFAULT_HEALTH,
                competition_index:    round_to(stats.store_count as f64 / grid_count as f64, 3),
                survival_probability: DEFAULT_SURVIVAL,
                sales_estimate_low:   0.0,
                sales_estimate_high:  0.0,
                store_count:          stats.store_count,
                floating_population,
                resident_population:  stats.total_population,
                avg_rent_per_area,
                population_score:     DEFAULT_SUB_SCORE,
                floating_score:       DEFAULT_SUB_SCORE,
                rent_score:           DEFAULT_SUB_SCORE,
                risk_flags:           Vec::new(),
                grid_count,
                source:               ResultSource::Default,
            });
        };

        let flag_sets = self.store.risk_flag_sets(&cell_ids, industry_code)?;

        Ok(AnalysisResult {
            health_score:         round_to(summary.health_score, 1),
            competition_index:    round_to(summary.competition_index, 3),
            survival_probability: round_to(summary.survival_probability, 3),
            sales_estimate_low:   summary.sales_estimate_low.round(),
            sales_estimate_high:  summary.sales_estimate_high.round(),
            store_count:          stats.store_count,
            floating_population,
            resident_population:  stats.total_population,
            avg_rent_per_area,
            population_score:     round_to(summary.population_score, 1),
            floating_score:       round_to(summary.floating_score, 1),
            rent_score:           round_to(summary.rent_score, 1),
            risk_flags:           union_flags(flag_sets),
            grid_count,
            source:               ResultSource::Computed,
        })
    }
}

fn validate(point: LatLng, radius_m: f64) -> EngineResult<()> {
    if !point.is_finite() {
        return Err(EngineError::InvalidQuery {
            reason: format!("point ({}, {}) is not finite", point.lat, point.lng),
        });
    }
    if !radius_m.is_finite() || radius_m < 0.0 {
        return Err(EngineError::InvalidQuery {
            reason: format!("radius must be a finite, non-negative number of meters, got {radius_m}"),
        });
    }
    Ok(())
}

/// Flags from every set, deduplicated by message. First occurrence wins.
pub fn union_flags(sets: Vec<Vec<RiskFlag>>) -> Vec<RiskFlag> {
    let mut seen = HashSet::new();
    sets.into_iter()
        .flatten()
        .filter(|flag| seen.insert(flag.message.clone()))
        .collect()
}
