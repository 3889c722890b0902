//! Assigning raw source records to grid cells.
//!
//! Store points are binned by containment. District-level figures are
//! spread over the cells of the district: extensive totals (people,
//! visitors) are split evenly, intensive values (rent per area) are copied
//! to every cell. Even splitting is a modelling approximation kept as-is.

use crate::{
    grid::GridLayout,
    stats::CompetitorStat,
    types::{Bounds, CellId, IndustryCode, LatLng},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single business location from a store registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorePoint {
    pub industry_code: IndustryCode,
    pub location:      LatLng,
    #[serde(default = "default_active")]
    pub is_active:     bool,
}

fn default_active() -> bool {
    true
}

/// Count stores per (cell, industry). Points outside the grid are dropped.
/// When the registry contains closed stores, the closure rate is the
/// closed share of all stores seen in that cell and industry.
pub fn bin_store_points(layout: &GridLayout, points: &[StorePoint]) -> Vec<CompetitorStat> {
    let mut tally: BTreeMap<(CellId, IndustryCode), (i64, i64)> = BTreeMap::new();
    let mut dropped = 0usize;

    for p in points {
        let Some(cell) = layout.locate(p.location) else {
            dropped += 1;
            continue;
        };
        let entry = tally
            .entry((cell.cell_id, p.industry_code.clone()))
            .or_insert((0, 0));
        if p.is_active {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    if dropped > 0 {
        log::debug!("{dropped} store points fell outside the grid");
    }

    tally
        .into_iter()
        .filter(|(_, (open, _))| *open > 0)
        .map(|((cell_id, industry_code), (open, closed))| CompetitorStat {
            cell_id,
            industry_code,
            store_count:  open,
            open_count:   open,
            close_count:  closed,
            closure_rate: (closed > 0).then(|| closed as f64 / (open + closed) as f64),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// A total to be divided among the district's cells.
    Extensive,
    /// A per-unit value every cell inherits.
    Intensive,
}

/// A figure reported for an administrative district.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictFigure {
    pub district_code: String,
    pub bounds:        Bounds,
    pub value:         f64,
}

/// Cells whose centroid lies inside `bounds`.
pub fn cells_in_district(layout: &GridLayout, bounds: &Bounds) -> Vec<CellId> {
    layout
        .cells
        .iter()
        .filter(|c| bounds.contains(c.centroid))
        .map(|c| c.cell_id)
        .collect()
}

/// Spread district figures over cells. Where districts overlap, extensive
/// shares add up and intensive values are averaged.
pub fn allocate(layout: &GridLayout, figures: &[DistrictFigure], measure: Measure) -> Vec<(CellId, f64)> {
    let mut acc: BTreeMap<CellId, (f64, u32)> = BTreeMap::new();

    for figure in figures {
        let cells = cells_in_district(layout, &figure.bounds);
        if cells.is_empty() {
            log::debug!("no cells for district {}, skipping", figure.district_code);
            continue;
        }
        let share = match measure {
            Measure::Extensive => figure.value / cells.len() as f64,
            Measure::Intensive => figure.value,
        };
        for cell_id in cells {
            let entry = acc.entry(cell_id).or_insert((0.0, 0));
            entry.0 += share;
            entry.1 += 1;
        }
    }

    acc.into_iter()
        .map(|(cell_id, (sum, n))| match measure {
            Measure::Extensive => (cell_id, sum),
            Measure::Intensive => (cell_id, sum / n as f64),
        })
        .collect()
}
