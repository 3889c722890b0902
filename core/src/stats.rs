//! Rows of the five statistics layers, as produced by collectors.
//!
//! Competitor and sales rows are keyed by (cell, industry); floating,
//! population and rent rows are industry-independent. Every layer except
//! competitors may hold several snapshots per key; only the latest is used.

use crate::types::{CellId, IndustryCode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorStat {
    pub cell_id:       CellId,
    pub industry_code: IndustryCode,
    pub store_count:   i64,
    #[serde(default)]
    pub open_count:    i64,
    #[serde(default)]
    pub close_count:   i64,
    #[serde(default)]
    pub closure_rate:  Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingStat {
    pub cell_id:        CellId,
    pub total_floating: f64,
    #[serde(default)]
    pub weekday_avg:    f64,
    #[serde(default)]
    pub weekend_avg:    f64,
    pub snapshot_date:  NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationStat {
    pub cell_id:          CellId,
    pub total_population: i64,
    #[serde(default)]
    pub age_20_39_ratio:  Option<f64>,
    pub snapshot_date:    NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesStat {
    pub cell_id:          CellId,
    pub industry_code:    IndustryCode,
    pub quarterly_sales:  f64,
    #[serde(default)]
    pub quarterly_count:  i64,
    #[serde(default)]
    pub avg_ticket_price: f64,
    pub snapshot_date:    NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentStat {
    pub cell_id:          CellId,
    pub rent_per_area:    f64,
    #[serde(default)]
    pub deposit_per_area: Option<f64>,
    pub snapshot_date:    NaiveDate,
}

/// One of the five statistics tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Competitors,
    Floating,
    Population,
    Sales,
    Rent,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::Competitors,
        Layer::Floating,
        Layer::Population,
        Layer::Sales,
        Layer::Rent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Competitors => "competitors",
            Layer::Floating    => "floating",
            Layer::Population  => "population",
            Layer::Sales       => "sales",
            Layer::Rent        => "rent",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The full set of rows for one layer, replacing whatever the layer held.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerBatch {
    Competitors(Vec<CompetitorStat>),
    Floating(Vec<FloatingStat>),
    Population(Vec<PopulationStat>),
    Sales(Vec<SalesStat>),
    Rent(Vec<RentStat>),
}

impl LayerBatch {
    pub fn layer(&self) -> Layer {
        match self {
            LayerBatch::Competitors(_) => Layer::Competitors,
            LayerBatch::Floating(_)    => Layer::Floating,
            LayerBatch::Population(_)  => Layer::Population,
            LayerBatch::Sales(_)       => Layer::Sales,
            LayerBatch::Rent(_)        => Layer::Rent,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LayerBatch::Competitors(rows) => rows.len(),
            LayerBatch::Floating(rows)    => rows.len(),
            LayerBatch::Population(rows)  => rows.len(),
            LayerBatch::Sales(rows)       => rows.len(),
            LayerBatch::Rent(rows)        => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
