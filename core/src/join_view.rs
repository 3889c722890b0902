//! Stats join view: one row per competitor record, with the latest
//! snapshot of every other layer attached.
//!
//! The SQL lives in `store::stats`; this module owns the row shape and the
//! missing-data policy (layer values default to 0, closure rate defaults to
//! the industry rate, else the global rate).

use crate::{
    config::ScoringConfig,
    error::EngineResult,
    store::GridStore,
    types::{CellId, IndustryCode},
};
use serde::{Deserialize, Serialize};

/// Joined row as read from the store, before defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RawJoinedRow {
    pub cell_id:             CellId,
    pub industry_code:       IndustryCode,
    pub competitor_count:    i64,
    pub closure_rate:        Option<f64>,
    pub floating_total:      Option<f64>,
    pub resident_population: Option<i64>,
    pub quarterly_sales:     Option<f64>,
    pub avg_ticket_price:    Option<f64>,
    pub rent_per_area:       Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRow {
    pub cell_id:             CellId,
    pub industry_code:       IndustryCode,
    pub competitor_count:    i64,
    pub closure_rate:        f64,
    pub floating_total:      f64,
    pub resident_population: i64,
    pub quarterly_sales:     f64,
    pub avg_ticket_price:    f64,
    pub rent_per_area:       f64,
}

impl JoinedRow {
    pub fn resolve(raw: RawJoinedRow, config: &ScoringConfig) -> Self {
        let closure_rate = raw
            .closure_rate
            .unwrap_or_else(|| config.closure_default(&raw.industry_code));
        Self {
            closure_rate,
            cell_id:             raw.cell_id,
            competitor_count:    raw.competitor_count,
            floating_total:      raw.floating_total.unwrap_or(0.0),
            resident_population: raw.resident_population.unwrap_or(0),
            quarterly_sales:     raw.quarterly_sales.unwrap_or(0.0),
            avg_ticket_price:    raw.avg_ticket_price.unwrap_or(0.0),
            rent_per_area:       raw.rent_per_area.unwrap_or(0.0),
            industry_code:       raw.industry_code,
        }
    }
}

pub struct StatsJoinView<'a> {
    store:  &'a GridStore,
    config: &'a ScoringConfig,
}

impl<'a> StatsJoinView<'a> {
    pub fn new(store: &'a GridStore, config: &'a ScoringConfig) -> Self {
        Self { store, config }
    }

    /// Stream every joined row through `f` from a single bulk query.
    /// Returns the number of rows visited.
    pub fn for_each_row<F>(&self, mut f: F) -> EngineResult<usize>
    where
        F: FnMut(JoinedRow) -> EngineResult<()>,
    {
        self.store
            .scan_joined_rows(|raw| f(JoinedRow::resolve(raw, self.config)))
    }

    /// Collect all rows. Meant for tests and small grids.
    pub fn rows(&self) -> EngineResult<Vec<JoinedRow>> {
        let mut rows = Vec::new();
        self.for_each_row(|row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }
}
