//! grid-runner: batch host for the grid scoring engine.
//!
//! Usage:
//!   grid-runner init-grid [--force]            --db area.db [--config engine.json]
//!   grid-runner collect [--seed 7] [--fixtures ./data/sample]
//!   grid-runner score [--period 2024-Q3]
//!   grid-runner pipeline [--seed 7] [--fixtures DIR] [--period P]
//!   grid-runner analyze --lat 37.5665 --lng 126.978 --radius 500 --industry Q12
//!   grid-runner cell --id 1234
//!   grid-runner industries
//!   grid-runner runs

use anyhow::{bail, Context, Result};
use marketarea_core::{
    config::EngineConfig,
    pipeline::{current_period, MarketEngine},
    types::LatLng,
};
use serde::Serialize;
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).filter(|a| !a.starts_with("--")) else {
        print_usage();
        return Ok(());
    };

    let db = parse_str(&args, "--db").unwrap_or("marketarea.db");
    let mut config = match parse_str(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = parse_str(&args, "--fixtures") {
        config.sources.sample_dir = Some(dir.to_string());
    }
    config.sources.seed = parse_arg(&args, "--seed", config.sources.seed);
    let period = parse_str(&args, "--period")
        .map(str::to_string)
        .unwrap_or_else(current_period);

    let engine = MarketEngine::open(config, db)
        .with_context(|| format!("cannot open database {db}"))?;

    match command.as_str() {
        "init-grid" => {
            let cells = if args.iter().any(|a| a == "--force") {
                engine.rebuild_grid()?
            } else {
                engine.ensure_grid()?
            };
            print_json(&serde_json::json!({ "cells": cells }))?;
        }
        "collect" => {
            warn_remote_sources(&engine);
            let collectors = engine.sample_collectors(today());
            let outcomes = engine.run_collectors(&collectors)?;
            print_json(&outcomes)?;
        }
        "score" => {
            let report = engine.recompute_scores(&period)?;
            print_json(&report)?;
        }
        "pipeline" => {
            warn_remote_sources(&engine);
            let collectors = engine.sample_collectors(today());
            let report = engine.run_pipeline(&collectors, &period)?;
            print_json(&report)?;
        }
        "analyze" => {
            let lat: f64 = require(&args, "--lat")?;
            let lng: f64 = require(&args, "--lng")?;
            let radius: f64 = require(&args, "--radius")?;
            let Some(industry) = parse_str(&args, "--industry") else {
                bail!("analyze needs --industry");
            };
            let result = engine.aggregate(LatLng::new(lat, lng), radius, industry)?;
            print_json(&result)?;
        }
        "cell" => {
            let id: i64 = require(&args, "--id")?;
            match engine.cell_health(id)? {
                Some(health) => print_json(&health)?,
                None => bail!("no cell with id {id}"),
            }
        }
        "industries" => print_json(&engine.industries())?,
        "runs" => print_json(&engine.score_runs()?)?,
        other => {
            print_usage();
            bail!("unknown command: {other}");
        }
    }

    Ok(())
}

/// Remote fetchers are not part of this host; keys only produce a notice.
fn warn_remote_sources(engine: &MarketEngine) {
    let sources = &engine.config.sources;
    let keyed = ["data_go_kr", "seoul", "kosis"].iter().any(|s| sources.has_key(s));
    if keyed && !sources.use_sample_data {
        log::warn!("API keys configured but no remote collectors are available; using sample data");
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_usage() {
    println!("grid-runner <command> [--db PATH] [--config PATH]");
    println!();
    println!("commands:");
    println!("  init-grid [--force]                  build the grid if missing or changed");
    println!("  collect [--seed N] [--fixtures DIR]  load every statistics layer");
    println!("  score [--period P]                   recompute all scores");
    println!("  pipeline                             grid, collect and score in one run");
    println!("  analyze --lat --lng --radius --industry");
    println!("  cell --id N                          scores for one cell");
    println!("  industries                           industry catalog");
    println!("  runs                                 score run ledger");
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn parse_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn require<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<T> {
    let Some(raw) = parse_str(args, flag) else {
        bail!("missing required {flag}");
    };
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {raw}"))
}
