//! Grid index builder: tiles the analysed region into equal-area cells.
//!
//! Cells are emitted row by row (south → north) and within a row column by
//! column (west → east). A row or column is emitted while its starting edge
//! lies strictly below the region's max bound, so the last row/column may
//! overhang the region. Output depends only on (region, cell size).

use crate::{
    error::{EngineError, EngineResult},
    geo,
    types::{Bounds, CellId, LatLng},
};
use serde::{Deserialize, Serialize};

/// Upper bound on cells per build. Finer grids are rejected up front
/// instead of exhausting memory halfway through the build.
pub const MAX_GRID_CELLS: u64 = 5_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub cell_id:  CellId,
    pub code:     String,
    pub centroid: LatLng,
    pub bounds:   Bounds,
}

/// A built grid: the cells plus the geometry needed to locate points.
#[derive(Debug, Clone)]
pub struct GridLayout {
    pub region:      Bounds,
    pub cell_size_m: f64,
    pub dlat:        f64,
    pub dlng:        f64,
    pub rows:        usize,
    pub cols:        usize,
    pub cells:       Vec<GridCell>,
}

impl GridLayout {
    /// Rebuild the layout geometry around cells loaded from the store.
    /// The cells must come from a build with the same parameters.
    pub fn from_cells(region: Bounds, cell_size_m: f64, cells: Vec<GridCell>) -> EngineResult<Self> {
        let (dlat, dlng, rows, cols) = dimensions(&region, cell_size_m)?;
        Ok(Self { region, cell_size_m, dlat, dlng, rows, cols, cells })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell containing `p`, found arithmetically from the row/column deltas.
    pub fn locate(&self, p: LatLng) -> Option<&GridCell> {
        if !p.is_finite() || p.lat < self.region.min_lat || p.lng < self.region.min_lng {
            return None;
        }
        let row = ((p.lat - self.region.min_lat) / self.dlat).floor() as usize;
        let col = ((p.lng - self.region.min_lng) / self.dlng).floor() as usize;
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells.get(row * self.cols + col)
    }
}

pub struct GridIndexBuilder;

impl GridIndexBuilder {
    /// Build the full tiling for `region` with square cells of `cell_size_m`.
    pub fn build(region: Bounds, cell_size_m: f64) -> EngineResult<GridLayout> {
        let (dlat, dlng, rows, cols) = dimensions(&region, cell_size_m)?;

        let mut cells = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            let lat0 = region.min_lat + row as f64 * dlat;
            let lat1 = lat0 + dlat;
            for col in 0..cols {
                let lng0 = region.min_lng + col as f64 * dlng;
                let lng1 = lng0 + dlng;
                let index = cells.len();
                cells.push(GridCell {
                    cell_id:  index as CellId + 1,
                    code:     format!("G{index:06}"),
                    centroid: LatLng::new((lat0 + lat1) / 2.0, (lng0 + lng1) / 2.0),
                    bounds:   Bounds::new(lat0, lng0, lat1, lng1),
                });
            }
        }

        log::debug!(
            "grid built: {rows} rows x {cols} cols = {} cells ({cell_size_m}m)",
            cells.len()
        );
        Ok(GridLayout { region, cell_size_m, dlat, dlng, rows, cols, cells })
    }
}

fn dimensions(region: &Bounds, cell_size_m: f64) -> EngineResult<(f64, f64, usize, usize)> {
    let finite = [region.min_lat, region.min_lng, region.max_lat, region.max_lng, cell_size_m]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return Err(invalid("region and cell size must be finite"));
    }
    if cell_size_m <= 0.0 {
        return Err(invalid(format!("cell size must be positive, got {cell_size_m}")));
    }
    if region.min_lat >= region.max_lat || region.min_lng >= region.max_lng {
        return Err(invalid("region bounds are empty or inverted"));
    }
    if region.min_lat <= -90.0 || region.max_lat >= 90.0 {
        return Err(invalid("region must not touch the poles"));
    }

    let dlat = geo::meters_to_degrees_lat(cell_size_m);
    let dlng = geo::meters_to_degrees_lng(cell_size_m, region.mid_lat());

    let est_rows = ((region.max_lat - region.min_lat) / dlat).ceil() as u64 + 1;
    let est_cols = ((region.max_lng - region.min_lng) / dlng).ceil() as u64 + 1;
    if est_rows.saturating_mul(est_cols) > MAX_GRID_CELLS {
        return Err(invalid(format!(
            "{est_rows}x{est_cols} cells exceeds the {MAX_GRID_CELLS} cell limit"
        )));
    }

    let rows = steps_below(region.min_lat, region.max_lat, dlat);
    let cols = steps_below(region.min_lng, region.max_lng, dlng);
    Ok((dlat, dlng, rows, cols))
}

/// Number of steps `min + i·delta` that start strictly below `max`.
fn steps_below(min: f64, max: f64, delta: f64) -> usize {
    let mut n = 0usize;
    while min + n as f64 * delta < max {
        n += 1;
    }
    n
}

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidGrid { reason: reason.into() }
}
