//! Statistics collectors and their outcomes.
//!
//! A collector produces the complete row set for one layer. The engine
//! only needs the rows; where they come from (remote API, fixture file,
//! generator) is the collector's business. Failures are reported as a
//! `LayerOutcome`, never raised to the orchestrating job.

use crate::{
    allocation::{self, DistrictFigure, Measure, StorePoint},
    grid::GridLayout,
    stats::{
        CompetitorStat, FloatingStat, Layer, LayerBatch, PopulationStat, RentStat, SalesStat,
    },
};
use chrono::NaiveDate;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub trait StatCollector {
    fn layer(&self) -> Layer;

    /// Produce every row of the layer for the given grid.
    fn collect(&self, layout: &GridLayout) -> anyhow::Result<LayerBatch>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LayerStatus {
    Loaded { rows: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerOutcome {
    pub layer:  Layer,
    #[serde(flatten)]
    pub status: LayerStatus,
}

impl LayerOutcome {
    pub fn loaded(layer: Layer, rows: usize) -> Self {
        Self { layer, status: LayerStatus::Loaded { rows } }
    }

    pub fn failed(layer: Layer, reason: impl Into<String>) -> Self {
        Self { layer, status: LayerStatus::Failed { reason: reason.into() } }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, LayerStatus::Failed { .. })
    }
}

// ── Fixture collector ────────────────────────────────────────────────────────

/// Loads a layer from a JSON array of rows, either a file or inline text.
pub struct FixtureCollector {
    layer:  Layer,
    source: FixtureSource,
}

enum FixtureSource {
    File(PathBuf),
    Inline(String),
}

impl FixtureCollector {
    pub fn from_file(layer: Layer, path: impl Into<PathBuf>) -> Self {
        Self { layer, source: FixtureSource::File(path.into()) }
    }

    pub fn from_json(layer: Layer, json: impl Into<String>) -> Self {
        Self { layer, source: FixtureSource::Inline(json.into()) }
    }

    /// `<dir>/<layer>.json` for every layer.
    pub fn all_in_dir(dir: &str) -> Vec<Self> {
        Layer::ALL
            .iter()
            .map(|layer| Self::from_file(*layer, format!("{dir}/{}.json", layer.name())))
            .collect()
    }

    fn read(&self) -> anyhow::Result<String> {
        match &self.source {
            FixtureSource::Inline(json) => Ok(json.clone()),
            FixtureSource::File(path) => std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display())),
        }
    }
}

impl StatCollector for FixtureCollector {
    fn layer(&self) -> Layer {
        self.layer
    }

    fn collect(&self, _layout: &GridLayout) -> anyhow::Result<LayerBatch> {
        let json = self.read()?;
        let batch = match self.layer {
            Layer::Competitors => LayerBatch::Competitors(serde_json::from_str(&json)?),
            Layer::Floating    => LayerBatch::Floating(serde_json::from_str(&json)?),
            Layer::Population  => LayerBatch::Population(serde_json::from_str(&json)?),
            Layer::Sales       => LayerBatch::Sales(serde_json::from_str(&json)?),
            Layer::Rent        => LayerBatch::Rent(serde_json::from_str(&json)?),
        };
        Ok(batch)
    }
}

// ── Store registry collector ─────────────────────────────────────────────────

/// Builds the competitor layer by binning individual store locations.
pub struct StoreRegistryCollector {
    points: Vec<StorePoint>,
}

impl StoreRegistryCollector {
    pub fn new(points: Vec<StorePoint>) -> Self {
        Self { points }
    }
}

impl StatCollector for StoreRegistryCollector {
    fn layer(&self) -> Layer {
        Layer::Competitors
    }

    fn collect(&self, layout: &GridLayout) -> anyhow::Result<LayerBatch> {
        Ok(LayerBatch::Competitors(allocation::bin_store_points(layout, &self.points)))
    }
}

// ── District collector ───────────────────────────────────────────────────────

/// Builds a per-cell layer from district-level figures. Floating and
/// population totals are split evenly; rent is inherited per cell.
pub struct DistrictCollector {
    layer:         Layer,
    figures:       Vec<DistrictFigure>,
    snapshot_date: NaiveDate,
}

impl DistrictCollector {
    pub fn new(layer: Layer, figures: Vec<DistrictFigure>, snapshot_date: NaiveDate) -> Self {
        Self { layer, figures, snapshot_date }
    }
}

impl StatCollector for DistrictCollector {
    fn layer(&self) -> Layer {
        self.layer
    }

    fn collect(&self, layout: &GridLayout) -> anyhow::Result<LayerBatch> {
        let date = self.snapshot_date;
        let batch = match self.layer {
            Layer::Floating => {
                let cells = allocation::allocate(layout, &self.figures, Measure::Extensive);
                LayerBatch::Floating(
                    cells
                        .into_iter()
                        .map(|(cell_id, total)| FloatingStat {
                            cell_id,
                            total_floating: total,
                            weekday_avg:    total * 0.7,
                            weekend_avg:    total * 0.3,
                            snapshot_date:  date,
                        })
                        .collect(),
                )
            }
            Layer::Population => {
                let cells = allocation::allocate(layout, &self.figures, Measure::Extensive);
                LayerBatch::Population(
                    cells
                        .into_iter()
                        .map(|(cell_id, total)| PopulationStat {
                            cell_id,
                            total_population: total.floor() as i64,
                            age_20_39_ratio:  None,
                            snapshot_date:    date,
                        })
                        .collect(),
                )
            }
            Layer::Rent => {
                let cells = allocation::allocate(layout, &self.figures, Measure::Intensive);
                LayerBatch::Rent(
                    cells
                        .into_iter()
                        .map(|(cell_id, rent)| RentStat {
                            cell_id,
                            rent_per_area:    rent,
                            deposit_per_area: None,
                            snapshot_date:    date,
                        })
                        .collect(),
                )
            }
            other => anyhow::bail!("district figures cannot produce the {other} layer"),
        };
        Ok(batch)
    }
}

// ── Synthetic collector ──────────────────────────────────────────────────────

/// Seeded generator of plausible rows for every cell. Same seed and grid,
/// same rows. Used when no fixture files or API keys are available.
pub struct SyntheticCollector {
    layer:         Layer,
    seed:          u64,
    industries:    Vec<String>,
    snapshot_date: NaiveDate,
    /// Probability that a given (cell, industry) has any stores.
    coverage:      f64,
}

impl SyntheticCollector {
    pub fn new(layer: Layer, seed: u64, industries: Vec<String>, snapshot_date: NaiveDate) -> Self {
        Self { layer, seed, industries, snapshot_date, coverage: 0.3 }
    }

    pub fn with_coverage(mut self, coverage: f64) -> Self {
        self.coverage = coverage.clamp(0.0, 1.0);
        self
    }

    /// One collector per layer sharing a seed.
    pub fn all_layers(seed: u64, industries: &[String], snapshot_date: NaiveDate) -> Vec<Self> {
        Layer::ALL
            .iter()
            .map(|layer| Self::new(*layer, seed, industries.to_vec(), snapshot_date))
            .collect()
    }

    fn rng(&self) -> Pcg64Mcg {
        let index = Layer::ALL.iter().position(|l| *l == self.layer).unwrap_or(0) as u64;
        Pcg64Mcg::seed_from_u64(self.seed ^ (index + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }
}

impl StatCollector for SyntheticCollector {
    fn layer(&self) -> Layer {
        self.layer
    }

    fn collect(&self, layout: &GridLayout) -> anyhow::Result<LayerBatch> {
        let mut rng = self.rng();
        let date = self.snapshot_date;
        let cells = layout.cells.iter().map(|c| c.cell_id);

        let batch = match self.layer {
            Layer::Competitors => {
                let mut rows = Vec::new();
                for cell_id in cells {
                    for code in &self.industries {
                        if !rng.gen_bool(self.coverage) {
                            continue;
                        }
                        let store_count = rng.gen_range(1..=8);
                        let closure_rate = rng.gen_bool(0.5).then(|| rng.gen_range(0.05..0.35));
                        rows.push(CompetitorStat {
                            cell_id,
                            industry_code: code.clone(),
                            store_count,
                            open_count: store_count,
                            close_count: 0,
                            closure_rate,
                        });
                    }
                }
                LayerBatch::Competitors(rows)
            }
            Layer::Floating => LayerBatch::Floating(
                cells
                    .map(|cell_id| {
                        let total: f64 = rng.gen_range(500.0..20_000.0);
                        FloatingStat {
                            cell_id,
                            total_floating: total.round(),
                            weekday_avg:    (total * 0.7).round(),
                            weekend_avg:    (total * 0.3).round(),
                            snapshot_date:  date,
                        }
                    })
                    .collect(),
            ),
            Layer::Population => LayerBatch::Population(
                cells
                    .map(|cell_id| PopulationStat {
                        cell_id,
                        total_population: rng.gen_range(0..3_000),
                        age_20_39_ratio:  Some(rng.gen_range(0.15..0.45)),
                        snapshot_date:    date,
                    })
                    .collect(),
            ),
            Layer::Sales => {
                let mut rows = Vec::new();
                for cell_id in cells {
                    for code in &self.industries {
                        if !rng.gen_bool(self.coverage) {
                            continue;
                        }
                        let quarterly_count: i64 = rng.gen_range(300..6_000);
                        let avg_ticket_price: f64 = rng.gen_range(5_000.0..40_000.0);
                        rows.push(SalesStat {
                            cell_id,
                            industry_code: code.clone(),
                            quarterly_sales: (quarterly_count as f64 * avg_ticket_price).round(),
                            quarterly_count,
                            avg_ticket_price: avg_ticket_price.round(),
                            snapshot_date: date,
                        });
                    }
                }
                LayerBatch::Sales(rows)
            }
            Layer::Rent => LayerBatch::Rent(
                cells
                    .map(|cell_id| {
                        let rent: f64 = rng.gen_range(20_000.0..120_000.0);
                        RentStat {
                            cell_id,
                            rent_per_area:    rent.round(),
                            deposit_per_area: Some((rent * 10.0).round()),
                            snapshot_date:    date,
                        }
                    })
                    .collect(),
            ),
        };
        Ok(batch)
    }
}
