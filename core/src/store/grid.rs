//! Store methods for the spatial grid.

use super::GridStore;
use crate::{
    error::EngineResult,
    grid::{GridCell, GridLayout},
    types::{Bounds, CellId, LatLng},
};
use rusqlite::{params, OptionalExtension, Row};

const CELL_COLUMNS: &str =
    "cell_id, code, center_lat, center_lng, min_lat, min_lng, max_lat, max_lng";

fn cell_from_row(row: &Row<'_>) -> rusqlite::Result<GridCell> {
    Ok(GridCell {
        cell_id:  row.get(0)?,
        code:     row.get(1)?,
        centroid: LatLng::new(row.get(2)?, row.get(3)?),
        bounds:   Bounds::new(row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?),
    })
}

impl GridStore {
    /// Replace the whole grid. Scores and every statistics layer are
    /// dropped first, since cell ids are not stable across parameters.
    pub fn replace_grid(&self, layout: &GridLayout, batch_size: usize) -> EngineResult<usize> {
        self.in_transaction(|store| {
            store.conn.execute_batch(
                "DELETE FROM grid_score;
                 DELETE FROM competitor_stat;
                 DELETE FROM floating_stat;
                 DELETE FROM population_stat;
                 DELETE FROM sales_stat;
                 DELETE FROM rent_stat;
                 DELETE FROM grid_cell;
                 DELETE FROM grid_meta;",
            )?;

            let mut stmt = store.conn.prepare_cached(
                "INSERT INTO grid_cell
                    (cell_id, code, center_lat, center_lng, min_lat, min_lng, max_lat, max_lng)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (n, chunk) in layout.cells.chunks(batch_size.max(1)).enumerate() {
                for cell in chunk {
                    stmt.execute(params![
                        cell.cell_id,
                        cell.code,
                        cell.centroid.lat,
                        cell.centroid.lng,
                        cell.bounds.min_lat,
                        cell.bounds.min_lng,
                        cell.bounds.max_lat,
                        cell.bounds.max_lng,
                    ])?;
                }
                log::debug!("grid chunk {n}: {} cells inserted", chunk.len());
            }

            store.conn.execute(
                "INSERT INTO grid_meta
                    (id, min_lat, min_lng, max_lat, max_lng, cell_size_m, cell_count)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    layout.region.min_lat,
                    layout.region.min_lng,
                    layout.region.max_lat,
                    layout.region.max_lng,
                    layout.cell_size_m,
                    layout.cells.len() as i64,
                ],
            )?;
            Ok(layout.cells.len())
        })
    }

    pub fn cell_count(&self) -> EngineResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM grid_cell", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Region and cell size of the last build, if any.
    pub fn grid_params(&self) -> EngineResult<Option<(Bounds, f64)>> {
        let params = self
            .conn
            .query_row(
                "SELECT min_lat, min_lng, max_lat, max_lng, cell_size_m FROM grid_meta WHERE id = 1",
                [],
                |row| {
                    Ok((
                        Bounds::new(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?),
                        row.get::<_, f64>(4)?,
                    ))
                },
            )
            .optional()?;
        Ok(params)
    }

    /// All cells in build order.
    pub fn all_cells(&self) -> EngineResult<Vec<GridCell>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CELL_COLUMNS} FROM grid_cell ORDER BY cell_id ASC"))?;
        let cells = stmt
            .query_map([], cell_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    pub fn cell(&self, cell_id: CellId) -> EngineResult<Option<GridCell>> {
        let cell = self
            .conn
            .query_row(
                &format!("SELECT {CELL_COLUMNS} FROM grid_cell WHERE cell_id = ?1"),
                params![cell_id],
                cell_from_row,
            )
            .optional()?;
        Ok(cell)
    }

    /// Cells whose rectangle overlaps `bbox` (edges touching count).
    pub fn cells_in_bbox(&self, bbox: &Bounds) -> EngineResult<Vec<GridCell>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {CELL_COLUMNS} FROM grid_cell
             WHERE min_lat <= ?3 AND max_lat >= ?1
               AND min_lng <= ?4 AND max_lng >= ?2
             ORDER BY cell_id ASC"
        ))?;
        let cells = stmt
            .query_map(
                params![bbox.min_lat, bbox.min_lng, bbox.max_lat, bbox.max_lng],
                cell_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cells)
    }
}
