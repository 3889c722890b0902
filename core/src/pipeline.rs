//! Market engine: the batch jobs and queries exposed to a host.
//!
//! JOB ORDER (for a full refresh):
//!   1. rebuild or reuse the grid
//!   2. run every collector; a failed layer keeps its previous rows
//!   3. recompute all scores against a fresh baseline
//!
//! RULES:
//!   - Rebuilds are serialized by the caller. Nothing here locks.
//!   - Queries never write.
//!   - A collector failure is recorded, never raised.

use crate::{
    aggregator::{AnalysisResult, RadiusAggregator},
    collector::{FixtureCollector, LayerOutcome, LayerStatus, StatCollector, SyntheticCollector},
    config::{EngineConfig, IndustryInfo},
    error::{EngineError, EngineResult},
    grid::{GridCell, GridIndexBuilder, GridLayout},
    join_view::StatsJoinView,
    score_engine::{ScoreEngine, ScoreRecord},
    stats::Layer,
    store::{GridStore, ScoreRun},
    types::{quarter_label, CellId, LatLng},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// What one score rebuild did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRunReport {
    pub job_id:          String,
    pub period:          String,
    pub rows_scored:     usize,
    pub degraded_layers: Vec<Layer>,
}

/// A cell with every industry's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellHealth {
    pub cell:   GridCell,
    pub scores: Vec<ScoreRecord>,
}

pub struct MarketEngine {
    pub config: EngineConfig,
    store:      GridStore,
}

impl MarketEngine {
    /// Wrap an already migrated store.
    pub fn new(config: EngineConfig, store: GridStore) -> Self {
        Self { config, store }
    }

    /// Open the database at `path`, apply migrations and wrap it.
    pub fn open(config: EngineConfig, path: &str) -> EngineResult<Self> {
        let store = GridStore::open(path)?;
        store.migrate()?;
        Ok(Self::new(config, store))
    }

    pub fn store(&self) -> &GridStore {
        &self.store
    }

    // ── Grid ───────────────────────────────────────────────────

    /// Rebuild the grid from the configured region and cell size.
    /// Destroys every statistics row and score. Returns the cell count.
    pub fn rebuild_grid(&self) -> EngineResult<usize> {
        let layout = GridIndexBuilder::build(self.config.region, self.config.cell_size_m)?;
        let count = self.store.replace_grid(&layout, self.config.batch_size)?;
        log::info!("grid rebuilt: {count} cells of {}m", self.config.cell_size_m);
        Ok(count)
    }

    /// Build the grid only when none exists or its parameters differ from
    /// the configuration. Returns the cell count.
    pub fn ensure_grid(&self) -> EngineResult<usize> {
        if let Some((region, cell_size_m)) = self.store.grid_params()? {
            if region == self.config.region && cell_size_m == self.config.cell_size_m {
                let count = self.store.cell_count()?;
                log::debug!("grid up to date ({count} cells)");
                return Ok(count as usize);
            }
            log::info!("grid parameters changed, rebuilding");
        }
        self.rebuild_grid()
    }

    /// The stored grid with its lookup geometry.
    pub fn layout(&self) -> EngineResult<GridLayout> {
        let (region, cell_size_m) = self.store.grid_params()?.ok_or(EngineError::GridNotBuilt)?;
        GridLayout::from_cells(region, cell_size_m, self.store.all_cells()?)
    }

    // ── Collection ─────────────────────────────────────────────

    /// Run every collector against the stored grid and replace each layer
    /// it produced. Store errors propagate; collector errors are recorded.
    pub fn run_collectors(
        &self,
        collectors: &[Box<dyn StatCollector>],
    ) -> EngineResult<Vec<LayerOutcome>> {
        let layout = self.layout()?;
        let mut outcomes = Vec::with_capacity(collectors.len());

        for collector in collectors {
            let layer = collector.layer();
            let outcome = match collector.collect(&layout) {
                Ok(batch) if batch.layer() != layer => LayerOutcome::failed(
                    layer,
                    format!("collector returned {} rows", batch.layer()),
                ),
                Ok(batch) => {
                    if batch.is_empty() {
                        log::warn!("{layer}: collector returned no rows");
                    }
                    let rows = self.store.replace_layer(&batch)?;
                    log::info!("{layer}: {rows} rows loaded");
                    LayerOutcome::loaded(layer, rows)
                }
                Err(e) => LayerOutcome::failed(layer, format!("{e:#}")),
            };
            if let LayerStatus::Failed { reason } = &outcome.status {
                log::warn!("{layer}: collection failed, keeping previous rows: {reason}");
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Collectors for offline runs: fixture files when `sample_dir` is
    /// configured, otherwise the seeded synthetic generator.
    pub fn sample_collectors(&self, snapshot_date: NaiveDate) -> Vec<Box<dyn StatCollector>> {
        if let Some(dir) = &self.config.sources.sample_dir {
            return FixtureCollector::all_in_dir(dir)
                .into_iter()
                .map(|c| Box::new(c) as Box<dyn StatCollector>)
                .collect();
        }
        let codes: Vec<String> = self.config.industries.iter().map(|i| i.code.clone()).collect();
        SyntheticCollector::all_layers(self.config.sources.seed, &codes, snapshot_date)
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn StatCollector>)
            .collect()
    }

    // ── Scoring ────────────────────────────────────────────────

    /// Delete every score and rebuild from the latest statistics.
    pub fn recompute_scores(&self, period: &str) -> EngineResult<ScoreRunReport> {
        self.score_all(period, Vec::new())
    }

    fn score_all(&self, period: &str, outcomes: Vec<LayerOutcome>) -> EngineResult<ScoreRunReport> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().to_rfc3339();
        let batch_size = self.config.batch_size.max(1);
        let scoring = &self.config.scoring;

        log::info!("score run {job_id} started for {period}");

        let rows_scored = self.store.in_transaction(|store| {
            let cleared = store.clear_scores()?;
            log::debug!("cleared {cleared} previous scores");

            let baseline = store.baseline()?;
            log::debug!("baseline: {baseline:?}");

            let engine = ScoreEngine::new(scoring);
            let mut pending: Vec<ScoreRecord> = Vec::with_capacity(batch_size);
            let mut flushed = 0usize;

            StatsJoinView::new(store, scoring).for_each_row(|row| {
                pending.push(engine.score_row(&row, &baseline, period));
                if pending.len() >= batch_size {
                    store.insert_scores(&pending)?;
                    flushed += pending.len();
                    log::debug!("flushed {} scores ({flushed} total)", pending.len());
                    pending.clear();
                }
                Ok(())
            })?;
            store.insert_scores(&pending)?;
            let rows_scored = flushed + pending.len();

            store.insert_score_run(&ScoreRun {
                job_id:         job_id.clone(),
                period:         period.to_string(),
                started_at:     started_at.clone(),
                rows_scored:    rows_scored as i64,
                layer_outcomes: outcomes.clone(),
            })?;
            Ok(rows_scored)
        })?;

        if rows_scored == 0 {
            log::warn!("score run {job_id}: no competitor rows to score");
        }
        let degraded_layers: Vec<Layer> = outcomes
            .iter()
            .filter(|o| o.is_failed())
            .map(|o| o.layer)
            .collect();
        log::info!(
            "score run {job_id} finished: {rows_scored} rows, {} degraded layers",
            degraded_layers.len()
        );

        Ok(ScoreRunReport { job_id, period: period.to_string(), rows_scored, degraded_layers })
    }

    /// Ensure the grid, run the collectors, then rescore everything.
    pub fn run_pipeline(
        &self,
        collectors: &[Box<dyn StatCollector>],
        period: &str,
    ) -> EngineResult<ScoreRunReport> {
        self.ensure_grid()?;
        let outcomes = self.run_collectors(collectors)?;
        self.score_all(period, outcomes)
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn aggregate(
        &self,
        point: LatLng,
        radius_m: f64,
        industry_code: &str,
    ) -> EngineResult<AnalysisResult> {
        RadiusAggregator::new(&self.store).aggregate(point, radius_m, industry_code)
    }

    pub fn cell_health(&self, cell_id: CellId) -> EngineResult<Option<CellHealth>> {
        let Some(cell) = self.store.cell(cell_id)? else {
            return Ok(None);
        };
        let scores = self.store.scores_for_cell(cell_id)?;
        Ok(Some(CellHealth { cell, scores }))
    }

    pub fn industries(&self) -> &[IndustryInfo] {
        &self.config.industries
    }

    pub fn score_runs(&self) -> EngineResult<Vec<ScoreRun>> {
        self.store.score_runs()
    }
}

/// Quarter label for today, e.g. "2024-Q3".
pub fn current_period() -> String {
    quarter_label(chrono::Local::now().date_naive())
}
