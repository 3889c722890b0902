//! Store methods for the statistics layers and the bulk join.

use super::GridStore;
use crate::{
    error::EngineResult,
    join_view::RawJoinedRow,
    score_engine::Baseline,
    stats::{Layer, LayerBatch},
    types::CellId,
};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Latest snapshot per key for every snapshotted layer, selected with one
/// window pass per table. Equal dates resolve to the last inserted row.
const LATEST_CTES: &str = "
    latest_floating AS (
        SELECT cell_id, total_floating FROM (
            SELECT cell_id, total_floating,
                   ROW_NUMBER() OVER (PARTITION BY cell_id
                                      ORDER BY snapshot_date DESC, id DESC) AS rn
            FROM floating_stat
        ) WHERE rn = 1
    ),
    latest_population AS (
        SELECT cell_id, total_population FROM (
            SELECT cell_id, total_population,
                   ROW_NUMBER() OVER (PARTITION BY cell_id
                                      ORDER BY snapshot_date DESC, id DESC) AS rn
            FROM population_stat
        ) WHERE rn = 1
    ),
    latest_sales AS (
        SELECT cell_id, industry_code, quarterly_sales, avg_ticket_price FROM (
            SELECT cell_id, industry_code, quarterly_sales, avg_ticket_price,
                   ROW_NUMBER() OVER (PARTITION BY cell_id, industry_code
                                      ORDER BY snapshot_date DESC, id DESC) AS rn
            FROM sales_stat
        ) WHERE rn = 1
    ),
    latest_rent AS (
        SELECT cell_id, rent_per_area FROM (
            SELECT cell_id, rent_per_area,
                   ROW_NUMBER() OVER (PARTITION BY cell_id
                                      ORDER BY snapshot_date DESC, id DESC) AS rn
            FROM rent_stat
        ) WHERE rn = 1
    )";

/// Raw layer figures over the cells matched by a radius query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RadiusStats {
    pub store_count:      i64,
    pub avg_floating:     f64,
    pub total_population: i64,
    pub avg_rent:         f64,
}

impl GridStore {
    // ── Layer writes ───────────────────────────────────────────

    /// Delete every row of the batch's layer and insert the batch,
    /// atomically. Returns the number of rows written.
    pub fn replace_layer(&self, batch: &LayerBatch) -> EngineResult<usize> {
        self.in_transaction(|store| {
            store
                .conn
                .execute(&format!("DELETE FROM {}", layer_table(batch.layer())), [])?;
            store.insert_layer_rows(batch)
        })
    }

    /// Insert the batch next to existing snapshots. Competitor rows have
    /// no snapshots and overwrite the existing (cell, industry) row.
    pub fn append_layer(&self, batch: &LayerBatch) -> EngineResult<usize> {
        self.in_transaction(|store| store.insert_layer_rows(batch))
    }

    fn insert_layer_rows(&self, batch: &LayerBatch) -> EngineResult<usize> {
        match batch {
            LayerBatch::Competitors(rows) => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT OR REPLACE INTO competitor_stat
                        (cell_id, industry_code, store_count, open_count, close_count, closure_rate)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        r.cell_id,
                        r.industry_code,
                        r.store_count,
                        r.open_count,
                        r.close_count,
                        r.closure_rate,
                    ])?;
                }
            }
            LayerBatch::Floating(rows) => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO floating_stat
                        (cell_id, total_floating, weekday_avg, weekend_avg, snapshot_date)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        r.cell_id,
                        r.total_floating,
                        r.weekday_avg,
                        r.weekend_avg,
                        r.snapshot_date.to_string(),
                    ])?;
                }
            }
            LayerBatch::Population(rows) => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO population_stat
                        (cell_id, total_population, age_20_39_ratio, snapshot_date)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        r.cell_id,
                        r.total_population,
                        r.age_20_39_ratio,
                        r.snapshot_date.to_string(),
                    ])?;
                }
            }
            LayerBatch::Sales(rows) => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO sales_stat
                        (cell_id, industry_code, quarterly_sales, quarterly_count,
                         avg_ticket_price, snapshot_date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        r.cell_id,
                        r.industry_code,
                        r.quarterly_sales,
                        r.quarterly_count,
                        r.avg_ticket_price,
                        r.snapshot_date.to_string(),
                    ])?;
                }
            }
            LayerBatch::Rent(rows) => {
                let mut stmt = self.conn.prepare_cached(
                    "INSERT INTO rent_stat
                        (cell_id, rent_per_area, deposit_per_area, snapshot_date)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for r in rows {
                    stmt.execute(params![
                        r.cell_id,
                        r.rent_per_area,
                        r.deposit_per_area,
                        r.snapshot_date.to_string(),
                    ])?;
                }
            }
        }
        Ok(batch.len())
    }

    /// Row count of one layer table, all snapshots included.
    pub fn layer_row_count(&self, layer: Layer) -> EngineResult<i64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", layer_table(layer)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Bulk join ──────────────────────────────────────────────

    /// Stream the competitor-driven join of all five layers through `f`.
    /// One statement for the whole table; nothing is fetched per cell.
    pub fn scan_joined_rows<F>(&self, mut f: F) -> EngineResult<usize>
    where
        F: FnMut(RawJoinedRow) -> EngineResult<()>,
    {
        let mut stmt = self.conn.prepare(&format!(
            "WITH {LATEST_CTES}
             SELECT c.cell_id, c.industry_code, c.store_count, c.closure_rate,
                    f.total_floating, p.total_population,
                    s.quarterly_sales, s.avg_ticket_price, r.rent_per_area
             FROM competitor_stat c
             LEFT JOIN latest_floating   f ON f.cell_id = c.cell_id
             LEFT JOIN latest_population p ON p.cell_id = c.cell_id
             LEFT JOIN latest_sales      s ON s.cell_id = c.cell_id
                                          AND s.industry_code = c.industry_code
             LEFT JOIN latest_rent       r ON r.cell_id = c.cell_id
             ORDER BY c.cell_id ASC, c.industry_code ASC"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(RawJoinedRow {
                cell_id:             row.get(0)?,
                industry_code:       row.get(1)?,
                competitor_count:    row.get(2)?,
                closure_rate:        row.get(3)?,
                floating_total:      row.get(4)?,
                resident_population: row.get(5)?,
                quarterly_sales:     row.get(6)?,
                avg_ticket_price:    row.get(7)?,
                rent_per_area:       row.get(8)?,
            })
        })?;

        let mut visited = 0usize;
        for row in rows {
            f(row?)?;
            visited += 1;
        }
        Ok(visited)
    }

    /// Citywide averages over the latest snapshot of every layer.
    pub fn baseline(&self) -> EngineResult<Baseline> {
        let mut baseline = self.conn.query_row(
            &format!(
                "WITH {LATEST_CTES}
                 SELECT
                    (SELECT COALESCE(AVG(store_count), 0.0)      FROM competitor_stat),
                    (SELECT COALESCE(AVG(total_floating), 0.0)   FROM latest_floating),
                    (SELECT COALESCE(AVG(total_population), 0.0) FROM latest_population),
                    (SELECT COALESCE(AVG(quarterly_sales), 0.0)  FROM latest_sales),
                    (SELECT COALESCE(AVG(rent_per_area), 0.0)    FROM latest_rent)"
            ),
            [],
            |row| {
                Ok(Baseline {
                    avg_count:          row.get(0)?,
                    avg_floating:       row.get(1)?,
                    avg_population:     row.get(2)?,
                    avg_sales:          row.get(3)?,
                    avg_rent:           row.get(4)?,
                    industry_avg_count: Default::default(),
                })
            },
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT industry_code, AVG(store_count) FROM competitor_stat
             GROUP BY industry_code",
        )?;
        baseline.industry_avg_count = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<Result<_, _>>()?;
        Ok(baseline)
    }

    // ── Radius rollup ──────────────────────────────────────────

    /// Raw layer figures over `cell_ids`: summed competitors for the
    /// industry, averaged floating and rent over cells that have data,
    /// summed resident population.
    pub fn radius_stats(&self, cell_ids: &[CellId], industry_code: &str) -> EngineResult<RadiusStats> {
        if cell_ids.is_empty() {
            return Ok(RadiusStats::default());
        }
        self.stage_matched_cells(cell_ids)?;
        let sql = format!(
            "WITH {LATEST_CTES},
             matched AS (SELECT m.cell_id FROM temp.matched_cell m
                           JOIN grid_cell g ON g.cell_id = m.cell_id)
             SELECT
                (SELECT COALESCE(SUM(c.store_count), 0) FROM competitor_stat c
                   JOIN matched m ON m.cell_id = c.cell_id
                  WHERE c.industry_code = ?1),
                (SELECT COALESCE(AVG(f.total_floating), 0.0) FROM latest_floating f
                   JOIN matched m ON m.cell_id = f.cell_id),
                (SELECT COALESCE(SUM(p.total_population), 0) FROM latest_population p
                   JOIN matched m ON m.cell_id = p.cell_id),
                (SELECT COALESCE(AVG(r.rent_per_area), 0.0) FROM latest_rent r
                   JOIN matched m ON m.cell_id = r.cell_id)"
        );

        let stats = self.conn.query_row(&sql, params![industry_code], |row| {
            Ok(RadiusStats {
                store_count:      row.get(0)?,
                avg_floating:     row.get(1)?,
                total_population: row.get(2)?,
                avg_rent:         row.get(3)?,
            })
        })?;
        Ok(stats)
    }
}

fn layer_table(layer: Layer) -> &'static str {
    match layer {
        Layer::Competitors => "competitor_stat",
        Layer::Floating    => "floating_stat",
        Layer::Population  => "population_stat",
        Layer::Sales       => "sales_stat",
        Layer::Rent        => "rent_stat",
    }
}
