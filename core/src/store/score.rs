//! Store methods for score records and the score-run ledger.

use super::GridStore;
use crate::{
    collector::LayerOutcome,
    error::{EngineError, EngineResult},
    score_engine::{RiskFlag, ScoreRecord},
    types::CellId,
};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const SCORE_COLUMNS: &str = "cell_id, industry_code, health_score, competition_index,
    survival_probability, sales_estimate_low, sales_estimate_high,
    population_score, floating_score, rent_score, risk_flags, period";

/// Per-field averages over a set of score records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub records:              i64,
    pub health_score:         f64,
    pub competition_index:    f64,
    pub survival_probability: f64,
    pub sales_estimate_low:   f64,
    pub sales_estimate_high:  f64,
    pub population_score:     f64,
    pub floating_score:       f64,
    pub rent_score:           f64,
}

/// Ledger entry for one score rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRun {
    pub job_id:         String,
    pub period:         String,
    pub started_at:     String,
    pub rows_scored:    i64,
    pub layer_outcomes: Vec<LayerOutcome>,
}

fn score_from_row(row: &Row<'_>) -> rusqlite::Result<(ScoreRecord, String)> {
    let flags_json: String = row.get(10)?;
    Ok((
        ScoreRecord {
            cell_id:              row.get(0)?,
            industry_code:        row.get(1)?,
            health_score:         row.get(2)?,
            competition_index:    row.get(3)?,
            survival_probability: row.get(4)?,
            sales_estimate_low:   row.get(5)?,
            sales_estimate_high:  row.get(6)?,
            population_score:     row.get(7)?,
            floating_score:       row.get(8)?,
            rent_score:           row.get(9)?,
            risk_flags:           Vec::new(),
            period:               row.get(11)?,
        },
        flags_json,
    ))
}

fn with_flags((mut record, flags_json): (ScoreRecord, String)) -> EngineResult<ScoreRecord> {
    record.risk_flags = serde_json::from_str(&flags_json)?;
    Ok(record)
}

impl GridStore {
    // ── Score table ────────────────────────────────────────────

    pub fn clear_scores(&self) -> EngineResult<usize> {
        let deleted = self.conn.execute("DELETE FROM grid_score", [])?;
        Ok(deleted)
    }

    pub fn insert_scores(&self, records: &[ScoreRecord]) -> EngineResult<()> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO grid_score ({SCORE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ))?;
        for r in records {
            stmt.execute(params![
                r.cell_id,
                r.industry_code,
                r.health_score,
                r.competition_index,
                r.survival_probability,
                r.sales_estimate_low,
                r.sales_estimate_high,
                r.population_score,
                r.floating_score,
                r.rent_score,
                serde_json::to_string(&r.risk_flags)?,
                r.period,
            ])?;
        }
        Ok(())
    }

    pub fn score_count(&self) -> EngineResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM grid_score", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn score(&self, cell_id: CellId, industry_code: &str) -> EngineResult<Option<ScoreRecord>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SCORE_COLUMNS} FROM grid_score
                     WHERE cell_id = ?1 AND industry_code = ?2"
                ),
                params![cell_id, industry_code],
                score_from_row,
            )
            .optional()?;
        raw.map(with_flags).transpose()
    }

    /// Every industry's score for one cell, ordered by industry code.
    pub fn scores_for_cell(&self, cell_id: CellId) -> EngineResult<Vec<ScoreRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SCORE_COLUMNS} FROM grid_score
             WHERE cell_id = ?1 ORDER BY industry_code ASC"
        ))?;
        let raw = stmt
            .query_map(params![cell_id], score_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(with_flags).collect()
    }

    /// Averages over the industry's score records in `cell_ids`;
    /// `None` when no record exists yet.
    pub fn score_summary(
        &self,
        cell_ids: &[CellId],
        industry_code: &str,
    ) -> EngineResult<Option<ScoreSummary>> {
        if cell_ids.is_empty() {
            return Ok(None);
        }
        self.stage_matched_cells(cell_ids)?;
        let sql = "SELECT COUNT(*),
                    AVG(health_score), AVG(competition_index), AVG(survival_probability),
                    AVG(sales_estimate_low), AVG(sales_estimate_high),
                    AVG(population_score), AVG(floating_score), AVG(rent_score)
             FROM grid_score
             WHERE cell_id IN (SELECT cell_id FROM temp.matched_cell) AND industry_code = ?1";

        let summary = self.conn.query_row(sql, params![industry_code], |row| {
            let records: i64 = row.get(0)?;
            if records == 0 {
                return Ok(None);
            }
            Ok(Some(ScoreSummary {
                records,
                health_score:         row.get(1)?,
                competition_index:    row.get(2)?,
                survival_probability: row.get(3)?,
                sales_estimate_low:   row.get(4)?,
                sales_estimate_high:  row.get(5)?,
                population_score:     row.get(6)?,
                floating_score:       row.get(7)?,
                rent_score:           row.get(8)?,
            }))
        })?;
        Ok(summary)
    }

    /// Non-empty risk flag lists for the industry in `cell_ids`, in cell order.
    pub fn risk_flag_sets(
        &self,
        cell_ids: &[CellId],
        industry_code: &str,
    ) -> EngineResult<Vec<Vec<RiskFlag>>> {
        if cell_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stage_matched_cells(cell_ids)?;
        let mut stmt = self.conn.prepare(
            "SELECT risk_flags FROM grid_score
             WHERE cell_id IN (SELECT cell_id FROM temp.matched_cell)
               AND industry_code = ?1 AND risk_flags != '[]'
             ORDER BY cell_id ASC",
        )?;
        let raw = stmt
            .query_map(params![industry_code], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter()
            .map(|json| serde_json::from_str::<Vec<RiskFlag>>(json).map_err(EngineError::from))
            .collect()
    }

    // ── Score runs ─────────────────────────────────────────────

    pub fn insert_score_run(&self, run: &ScoreRun) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO score_run (job_id, period, started_at, rows_scored, layer_outcomes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.job_id,
                run.period,
                run.started_at,
                run.rows_scored,
                serde_json::to_string(&run.layer_outcomes)?,
            ],
        )?;
        Ok(())
    }

    /// All recorded score runs, oldest first.
    pub fn score_runs(&self) -> EngineResult<Vec<ScoreRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, period, started_at, rows_scored, layer_outcomes
             FROM score_run ORDER BY started_at ASC, rowid ASC",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(job_id, period, started_at, rows_scored, outcomes)| -> EngineResult<ScoreRun> {
                Ok(ScoreRun {
                    job_id,
                    period,
                    started_at,
                    rows_scored,
                    layer_outcomes: serde_json::from_str(&outcomes)?,
                })
            })
            .collect()
    }
}
