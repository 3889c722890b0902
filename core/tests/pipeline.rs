//! End-to-end jobs: collectors, score runs and the run ledger.

use chrono::NaiveDate;
use marketarea_core::{
    allocation::StorePoint,
    collector::{
        FixtureCollector, LayerStatus, StatCollector, StoreRegistryCollector, SyntheticCollector,
    },
    config::EngineConfig,
    error::EngineError,
    join_view::StatsJoinView,
    pipeline::MarketEngine,
    score_engine::ScoreEngine,
    stats::{Layer, LayerBatch, RentStat},
    store::GridStore,
};

fn engine_with(config: EngineConfig) -> MarketEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = GridStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    MarketEngine::new(config, store)
}

fn engine() -> MarketEngine {
    engine_with(EngineConfig::default_test())
}

fn snapshot() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

fn competitors_json(cell_ids: &[i64]) -> String {
    let rows: Vec<String> = cell_ids
        .iter()
        .map(|id| format!(r#"{{"cell_id": {id}, "industry_code": "Q12", "store_count": 3}}"#))
        .collect();
    format!("[{}]", rows.join(","))
}

fn boxed<C: StatCollector + 'static>(c: C) -> Box<dyn StatCollector> {
    Box::new(c)
}

#[test]
fn synthetic_pipeline_scores_every_competitor_row() {
    let engine = engine();
    let codes = vec!["Q12".to_string(), "F02".to_string()];
    let collectors: Vec<Box<dyn StatCollector>> =
        SyntheticCollector::all_layers(7, &codes, snapshot())
            .into_iter()
            .map(boxed)
            .collect();

    let report = engine.run_pipeline(&collectors, "2024-Q2").unwrap();
    let store = engine.store();

    assert!(report.rows_scored > 0);
    assert!(report.degraded_layers.is_empty());
    assert_eq!(report.period, "2024-Q2");
    assert_eq!(store.score_count().unwrap(), report.rows_scored as i64);
    assert_eq!(
        store.layer_row_count(Layer::Competitors).unwrap(),
        report.rows_scored as i64,
        "one score per competitor row"
    );

    let runs = engine.score_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].job_id, report.job_id);
    assert_eq!(runs[0].layer_outcomes.len(), 5);
    assert!(runs[0]
        .layer_outcomes
        .iter()
        .all(|o| matches!(o.status, LayerStatus::Loaded { .. })));
}

#[test]
fn stored_scores_match_the_pure_engine() {
    let engine = engine();
    let codes = vec!["Q12".to_string()];
    let collectors: Vec<Box<dyn StatCollector>> =
        SyntheticCollector::all_layers(11, &codes, snapshot())
            .into_iter()
            .map(|c| boxed(c.with_coverage(0.5)))
            .collect();
    engine.run_pipeline(&collectors, "2024-Q2").unwrap();

    let store = engine.store();
    let scoring = &engine.config.scoring;
    let baseline = store.baseline().unwrap();
    let rows = StatsJoinView::new(store, scoring).rows().unwrap();
    assert!(!rows.is_empty());

    let scorer = ScoreEngine::new(scoring);
    for row in rows.iter().take(20) {
        let expected = scorer.score_row(row, &baseline, "2024-Q2");
        let stored = store
            .score(row.cell_id, &row.industry_code)
            .unwrap()
            .expect("stored score");
        assert_eq!(stored, expected, "cell {}", row.cell_id);
    }
}

#[test]
fn failed_collector_is_recorded_and_keeps_previous_rows() {
    let engine = engine();
    engine.rebuild_grid().unwrap();
    let store = engine.store();
    store
        .replace_layer(&LayerBatch::Rent(vec![RentStat {
            cell_id:          1,
            rent_per_area:    40_000.0,
            deposit_per_area: None,
            snapshot_date:    snapshot(),
        }]))
        .unwrap();

    let collectors = vec![
        boxed(FixtureCollector::from_json(Layer::Competitors, competitors_json(&[1, 2]))),
        boxed(FixtureCollector::from_file(Layer::Rent, "/nonexistent/rent.json")),
        boxed(FixtureCollector::from_json(Layer::Floating, "not json")),
    ];
    let report = engine.run_pipeline(&collectors, "2024-Q2").unwrap();

    assert_eq!(report.rows_scored, 2, "scoring proceeds despite failures");
    assert_eq!(report.degraded_layers, vec![Layer::Rent, Layer::Floating]);
    assert_eq!(store.layer_row_count(Layer::Rent).unwrap(), 1, "previous rent rows kept");

    let runs = engine.score_runs().unwrap();
    let outcomes = &runs[0].layer_outcomes;
    assert_eq!(outcomes[0].status, LayerStatus::Loaded { rows: 2 });
    match &outcomes[1].status {
        LayerStatus::Failed { reason } => assert!(reason.contains("/nonexistent/rent.json"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(outcomes[2].is_failed());
}

#[test]
fn mismatched_layer_counts_as_failure() {
    struct Confused;
    impl StatCollector for Confused {
        fn layer(&self) -> Layer {
            Layer::Sales
        }
        fn collect(
            &self,
            _layout: &marketarea_core::grid::GridLayout,
        ) -> anyhow::Result<LayerBatch> {
            Ok(LayerBatch::Rent(Vec::new()))
        }
    }

    let engine = engine();
    engine.rebuild_grid().unwrap();
    let outcomes = engine.run_collectors(&[boxed(Confused)]).unwrap();
    assert!(outcomes[0].is_failed());
    assert_eq!(outcomes[0].layer, Layer::Sales);
}

#[test]
fn collecting_without_a_grid_is_an_error() {
    let engine = engine();
    let collectors = vec![boxed(FixtureCollector::from_json(Layer::Competitors, "[]"))];
    assert!(matches!(engine.run_collectors(&collectors), Err(EngineError::GridNotBuilt)));
}

#[test]
fn score_table_shrinks_with_its_inputs() {
    let engine = engine();
    engine.rebuild_grid().unwrap();

    let three = vec![boxed(FixtureCollector::from_json(Layer::Competitors, competitors_json(&[1, 2, 3])))];
    engine.run_pipeline(&three, "2024-Q1").unwrap();
    assert_eq!(engine.store().score_count().unwrap(), 3);

    let one = vec![boxed(FixtureCollector::from_json(Layer::Competitors, competitors_json(&[2])))];
    let report = engine.run_pipeline(&one, "2024-Q2").unwrap();
    assert_eq!(report.rows_scored, 1);
    assert_eq!(engine.store().score_count().unwrap(), 1);
    assert!(engine.store().score(1, "Q12").unwrap().is_none(), "stale score survived");
    assert_eq!(engine.store().score(2, "Q12").unwrap().unwrap().period, "2024-Q2");
    assert_eq!(engine.score_runs().unwrap().len(), 2);
}

#[test]
fn small_batches_flush_every_row() {
    let config = EngineConfig { batch_size: 2, ..EngineConfig::default_test() };
    let engine = engine_with(config);
    engine.rebuild_grid().unwrap();

    let collectors = vec![boxed(FixtureCollector::from_json(
        Layer::Competitors,
        competitors_json(&[1, 2, 3, 4, 5]),
    ))];
    let report = engine.run_pipeline(&collectors, "2024-Q1").unwrap();
    assert_eq!(report.rows_scored, 5);
    assert_eq!(engine.store().score_count().unwrap(), 5);
}

#[test]
fn recompute_on_empty_tables_records_an_empty_run() {
    let engine = engine();
    engine.rebuild_grid().unwrap();

    let report = engine.recompute_scores("2024-Q1").unwrap();
    assert_eq!(report.rows_scored, 0);
    assert!(report.degraded_layers.is_empty());

    let runs = engine.score_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].rows_scored, 0);
    assert!(runs[0].layer_outcomes.is_empty());
}

#[test]
fn synthetic_collectors_are_deterministic() {
    let engine = engine();
    engine.rebuild_grid().unwrap();
    let layout = engine.layout().unwrap();
    let codes = vec!["Q12".to_string(), "Q01".to_string()];

    for layer in Layer::ALL {
        let a = SyntheticCollector::new(layer, 42, codes.clone(), snapshot()).collect(&layout).unwrap();
        let b = SyntheticCollector::new(layer, 42, codes.clone(), snapshot()).collect(&layout).unwrap();
        assert_eq!(a, b, "{layer} differs for the same seed");
        assert_eq!(a.layer(), layer);
    }

    let a = SyntheticCollector::new(Layer::Rent, 1, codes.clone(), snapshot()).collect(&layout).unwrap();
    let b = SyntheticCollector::new(Layer::Rent, 2, codes, snapshot()).collect(&layout).unwrap();
    assert_ne!(a, b, "different seeds should give different rows");
}

#[test]
fn store_registry_feeds_the_competitor_layer() {
    let engine = engine();
    engine.rebuild_grid().unwrap();
    let target = engine.store().cell(10).unwrap().unwrap();
    let points = vec![
        StorePoint { industry_code: "Q12".into(), location: target.centroid, is_active: true },
        StorePoint { industry_code: "Q12".into(), location: target.centroid, is_active: true },
    ];

    let outcomes = engine
        .run_collectors(&[boxed(StoreRegistryCollector::new(points))])
        .unwrap();
    assert_eq!(outcomes[0].status, LayerStatus::Loaded { rows: 1 });

    engine.recompute_scores("2024-Q2").unwrap();
    let health = engine.cell_health(10).unwrap().expect("cell 10");
    assert_eq!(health.cell, target);
    assert_eq!(health.scores.len(), 1);
    assert_eq!(health.scores[0].industry_code, "Q12");
    assert!(engine.cell_health(1_000_000).unwrap().is_none());
}

#[test]
fn sample_collectors_follow_the_config() {
    let engine = engine();
    let synthetic = engine.sample_collectors(snapshot());
    let layers: Vec<Layer> = synthetic.iter().map(|c| c.layer()).collect();
    assert_eq!(layers, Layer::ALL.to_vec());

    let mut config = EngineConfig::default_test();
    config.sources.sample_dir = Some("/tmp/does-not-exist".into());
    let engine = engine_with(config);
    engine.rebuild_grid().unwrap();
    let report = engine
        .run_pipeline(&engine.sample_collectors(snapshot()), "2024-Q2")
        .unwrap();
    assert_eq!(report.degraded_layers.len(), 5, "every fixture file is missing");
    assert_eq!(report.rows_scored, 0);
}

#[test]
fn industries_come_from_the_config() {
    let engine = engine();
    assert_eq!(engine.industries().len(), 22);
    assert!(engine.industries().iter().any(|i| i.code == "Q12"));
}
