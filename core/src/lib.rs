//! Grid scoring engine for market-area viability analysis.
//!
//! The region is tiled into fixed-size cells; per-cell statistics are
//! joined, scored per industry, and rolled up to arbitrary circles.

pub mod aggregator;
pub mod allocation;
pub mod collector;
pub mod config;
pub mod error;
pub mod geo;
pub mod grid;
pub mod join_view;
pub mod pipeline;
pub mod score_engine;
pub mod stats;
pub mod store;
pub mod types;
