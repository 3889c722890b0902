//! Grid construction, persistence and rebuild invalidation.

use chrono::NaiveDate;
use marketarea_core::{
    config::{EngineConfig, SEOUL_BOUNDS},
    error::EngineError,
    geo,
    grid::GridIndexBuilder,
    pipeline::MarketEngine,
    stats::{CompetitorStat, FloatingStat, Layer, LayerBatch},
    store::GridStore,
    types::{Bounds, LatLng},
};

fn engine() -> MarketEngine {
    let store = GridStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    MarketEngine::new(EngineConfig::default_test(), store)
}

fn competitors(cell_ids: &[i64]) -> LayerBatch {
    LayerBatch::Competitors(
        cell_ids
            .iter()
            .map(|&cell_id| CompetitorStat {
                cell_id,
                industry_code: "Q12".into(),
                store_count:   2,
                open_count:    2,
                close_count:   0,
                closure_rate:  None,
            })
            .collect(),
    )
}

#[test]
fn same_parameters_build_identical_grids() {
    let region = EngineConfig::default_test().region;
    let a = GridIndexBuilder::build(region, 100.0).unwrap();
    let b = GridIndexBuilder::build(region, 100.0).unwrap();

    assert!(!a.is_empty());
    assert_eq!(a.len(), b.len());
    assert_eq!(a.cells, b.cells, "cell codes and centroids must match across builds");
    assert_eq!(a.len(), a.rows * a.cols);
}

#[test]
fn cells_are_numbered_row_major_from_the_south_west() {
    let region = EngineConfig::default_test().region;
    let layout = GridIndexBuilder::build(region, 100.0).unwrap();

    let first = &layout.cells[0];
    assert_eq!(first.cell_id, 1);
    assert_eq!(first.code, "G000000");
    assert_eq!(first.bounds.min_lat, region.min_lat);
    assert_eq!(first.bounds.min_lng, region.min_lng);
    assert!((first.centroid.lat - (region.min_lat + layout.dlat / 2.0)).abs() < 1e-12);

    let second = &layout.cells[1];
    assert_eq!(second.code, "G000001");
    assert_eq!(second.bounds.min_lat, first.bounds.min_lat, "second cell is in the same row");
    assert!(second.centroid.lng > first.centroid.lng);

    let next_row = &layout.cells[layout.cols];
    assert!(next_row.centroid.lat > first.centroid.lat);
    assert!((next_row.centroid.lng - first.centroid.lng).abs() < 1e-12);
}

#[test]
fn last_row_and_column_may_overhang() {
    let region = EngineConfig::default_test().region;
    let layout = GridIndexBuilder::build(region, 100.0).unwrap();
    let last = layout.cells.last().unwrap();

    assert!(last.bounds.max_lat >= region.max_lat);
    assert!(last.bounds.max_lng >= region.max_lng);
    assert!(last.bounds.min_lat < region.max_lat, "a row must start inside the region");
    assert!(last.bounds.min_lng < region.max_lng);
}

#[test]
fn cell_deltas_use_the_shared_degree_relation() {
    let region = EngineConfig::default_test().region;
    let layout = GridIndexBuilder::build(region, 250.0).unwrap();
    assert_eq!(layout.dlat, geo::meters_to_degrees_lat(250.0));
    assert_eq!(layout.dlng, geo::meters_to_degrees_lng(250.0, region.mid_lat()));
}

#[test]
fn every_centroid_locates_its_own_cell() {
    let layout = GridIndexBuilder::build(EngineConfig::default_test().region, 100.0).unwrap();
    for cell in &layout.cells {
        let found = layout.locate(cell.centroid).expect("centroid inside grid");
        assert_eq!(found.cell_id, cell.cell_id);
    }
    assert!(layout.locate(LatLng::new(10.0, 10.0)).is_none());
    assert!(layout.locate(LatLng::new(f64::NAN, 127.0)).is_none());
}

#[test]
fn invalid_parameters_are_rejected() {
    let region = EngineConfig::default_test().region;
    let bad = [
        (region, 0.0),
        (region, -5.0),
        (region, f64::NAN),
        (Bounds::new(37.56, 126.97, 37.55, 126.985), 100.0),
        (Bounds::new(37.55, 126.97, 37.55, 126.985), 100.0),
        (Bounds::new(80.0, 0.0, 90.0, 1.0), 100.0),
    ];
    for (region, size) in bad {
        let err = GridIndexBuilder::build(region, size).unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidGrid { .. }),
            "expected InvalidGrid for {region:?} / {size}, got {err}"
        );
    }
}

#[test]
fn oversized_grids_are_rejected_up_front() {
    let err = GridIndexBuilder::build(SEOUL_BOUNDS, 1.0).unwrap_err();
    assert!(matches!(err, EngineError::InvalidGrid { .. }), "got {err}");
}

#[test]
fn stored_grid_matches_built_grid() {
    let engine = engine();
    let count = engine.rebuild_grid().unwrap();
    let built = GridIndexBuilder::build(engine.config.region, engine.config.cell_size_m).unwrap();

    assert_eq!(count, built.len());
    assert_eq!(engine.store().cell_count().unwrap(), built.len() as i64);
    assert_eq!(engine.store().all_cells().unwrap(), built.cells);

    let (region, size) = engine.store().grid_params().unwrap().expect("grid meta");
    assert_eq!(region, engine.config.region);
    assert_eq!(size, engine.config.cell_size_m);

    let layout = engine.layout().unwrap();
    assert_eq!(layout.rows, built.rows);
    assert_eq!(layout.cols, built.cols);
}

#[test]
fn layout_without_grid_is_an_error() {
    let engine = engine();
    assert!(matches!(engine.layout(), Err(EngineError::GridNotBuilt)));
}

#[test]
fn rebuild_discards_scores_and_statistics() {
    let engine = engine();
    engine.rebuild_grid().unwrap();

    let store = engine.store();
    store.replace_layer(&competitors(&[1, 2, 3])).unwrap();
    store
        .replace_layer(&LayerBatch::Floating(vec![FloatingStat {
            cell_id:        1,
            total_floating: 1_000.0,
            weekday_avg:    700.0,
            weekend_avg:    300.0,
            snapshot_date:  NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }]))
        .unwrap();
    engine.recompute_scores("2024-Q1").unwrap();
    assert_eq!(store.score_count().unwrap(), 3);

    let cells_before = store.all_cells().unwrap();
    engine.rebuild_grid().unwrap();

    assert_eq!(store.all_cells().unwrap(), cells_before, "rebuild is deterministic");
    assert_eq!(store.score_count().unwrap(), 0, "scores must not survive a rebuild");
    for layer in Layer::ALL {
        assert_eq!(store.layer_row_count(layer).unwrap(), 0, "{layer} rows survived a rebuild");
    }
}

#[test]
fn ensure_grid_keeps_an_up_to_date_grid() {
    let engine = engine();
    let first = engine.ensure_grid().unwrap();
    engine.store().replace_layer(&competitors(&[1])).unwrap();

    let second = engine.ensure_grid().unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.store().layer_row_count(Layer::Competitors).unwrap(), 1);
}

#[test]
fn ensure_grid_rebuilds_when_parameters_change() {
    let mut engine = engine();
    let fine = engine.ensure_grid().unwrap();
    engine.store().replace_layer(&competitors(&[1])).unwrap();

    engine.config.cell_size_m = 200.0;
    let coarse = engine.ensure_grid().unwrap();
    assert!(coarse < fine, "{coarse} cells at 200m vs {fine} at 100m");
    assert_eq!(engine.store().layer_row_count(Layer::Competitors).unwrap(), 0);
}
