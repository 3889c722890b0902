use crate::types::Bounds;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Scoring ────────────────────────────────────────────────────────

/// Health-score weights. Signs encode direction: competition and rent are
/// penalties, but both sub-scores are already inverted before weighting,
/// so only the magnitudes enter the weighted average.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub competition: f64,
    pub survival:    f64,
    pub floating:    f64,
    pub population:  f64,
    pub sales:       f64,
    pub rent:        f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            competition: -0.25,
            survival:     0.20,
            floating:     0.20,
            population:   0.15,
            sales:        0.15,
            rent:        -0.05,
        }
    }
}

impl ScoreWeights {
    pub fn abs_sum(&self) -> f64 {
        [self.competition, self.survival, self.floating, self.population, self.sales, self.rent]
            .iter()
            .map(|w| w.abs())
            .sum()
    }
}

/// Divisor used for the competition index.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionBaseline {
    /// Average competitor count across every (cell, industry) row.
    #[default]
    Citywide,
    /// Average competitor count across the rows of the same industry.
    PerIndustry,
}

/// Missing fields take their value from `ScoringConfig::default()`, so a
/// partial `scoring` object keeps the built-in industry closure rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub default_closure_rate:   f64,
    pub industry_closure_rates: HashMap<String, f64>,
    pub weights:                ScoreWeights,
    pub competition_baseline:   CompetitionBaseline,
}

impl ScoringConfig {
    /// Closure rate to assume when a competitor row carries none.
    pub fn closure_default(&self, industry_code: &str) -> f64 {
        self.industry_closure_rates
            .get(industry_code)
            .copied()
            .unwrap_or(self.default_closure_rate)
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let industry_closure_rates = [
            ("Q01", 0.18), // korean restaurant
            ("Q03", 0.22), // fast food
            ("Q04", 0.20), // chicken
            ("Q12", 0.15), // coffee
            ("F01", 0.12), // cosmetics
            ("F02", 0.08), // convenience store
            ("F10", 0.14), // household goods
        ]
        .into_iter()
        .map(|(code, rate)| (code.to_string(), rate))
        .collect();

        Self {
            default_closure_rate: 0.20,
            industry_closure_rates,
            weights: ScoreWeights::default(),
            competition_baseline: CompetitionBaseline::Citywide,
        }
    }
}

// ── Industry catalog ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndustryInfo {
    pub code:     String,
    pub name:     String,
    pub category: String,
}

fn default_industries() -> Vec<IndustryInfo> {
    [
        ("Q01", "Korean restaurant", "food"),
        ("Q02", "Chinese restaurant", "food"),
        ("Q03", "Fast food", "food"),
        ("Q04", "Chicken", "food"),
        ("Q05", "Snack bar", "food"),
        ("Q06", "Japanese restaurant", "food"),
        ("Q07", "Western restaurant", "food"),
        ("Q08", "Bakery", "food"),
        ("Q09", "Pizza", "food"),
        ("Q10", "Pub", "food"),
        ("Q11", "Cafe", "food"),
        ("Q12", "Coffee shop", "food"),
        ("F01", "Cosmetics", "retail"),
        ("F02", "Convenience store", "retail"),
        ("F03", "Supermarket", "retail"),
        ("F04", "Clothing", "retail"),
        ("F05", "Optician", "retail"),
        ("F06", "Pharmacy", "medical"),
        ("F07", "Laundry", "service"),
        ("F08", "Hair salon", "service"),
        ("F09", "Academy", "education"),
        ("F10", "Household goods", "retail"),
    ]
    .into_iter()
    .map(|(code, name, category)| IndustryInfo {
        code: code.into(),
        name: name.into(),
        category: category.into(),
    })
    .collect()
}

// ── Data sources ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Force fixture/synthetic data even when API keys are present.
    #[serde(default)]
    pub use_sample_data: bool,
    #[serde(default)]
    pub data_go_kr_api_key: Option<String>,
    #[serde(default)]
    pub seoul_open_data_api_key: Option<String>,
    #[serde(default)]
    pub kosis_api_key: Option<String>,
    /// Directory holding `<layer>.json` fixture files.
    #[serde(default)]
    pub sample_dir: Option<String>,
    /// Seed for the synthetic collectors.
    #[serde(default)]
    pub seed: u64,
}

impl DataSourceConfig {
    /// Whether a non-empty API key is configured for `source`.
    pub fn has_key(&self, source: &str) -> bool {
        let key = match source {
            "data_go_kr" => &self.data_go_kr_api_key,
            "seoul" => &self.seoul_open_data_api_key,
            "kosis" => &self.kosis_api_key,
            _ => return false,
        };
        key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn apply_env(&mut self) {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        if let Some(v) = read("MARKETAREA_DATA_GO_KR_API_KEY") {
            self.data_go_kr_api_key = Some(v);
        }
        if let Some(v) = read("MARKETAREA_SEOUL_OPEN_DATA_API_KEY") {
            self.seoul_open_data_api_key = Some(v);
        }
        if let Some(v) = read("MARKETAREA_KOSIS_API_KEY") {
            self.kosis_api_key = Some(v);
        }
        if let Some(v) = read("MARKETAREA_USE_SAMPLE_DATA") {
            self.use_sample_data = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }
}

// ── Engine config ──────────────────────────────────────────────────

/// Seoul bounding box (WGS84).
pub const SEOUL_BOUNDS: Bounds = Bounds {
    min_lat: 37.43,
    min_lng: 126.76,
    max_lat: 37.70,
    max_lng: 127.18,
};

fn default_batch_size() -> usize {
    1000
}

/// Settings for one process. Built once at start-up and passed by
/// reference to every component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub region: Bounds,
    pub cell_size_m: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default = "default_industries")]
    pub industries: Vec<IndustryInfo>,
    #[serde(default)]
    pub sources: DataSourceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            region: SEOUL_BOUNDS,
            cell_size_m: 100.0,
            batch_size: default_batch_size(),
            scoring: ScoringConfig::default(),
            industries: default_industries(),
            sources: DataSourceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file, then let `MARKETAREA_*` environment
    /// variables override the data-source keys.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let mut config = Self::from_json(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {path}: {e}"))?;
        config.sources.apply_env();
        Ok(config)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        if config.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if config.scoring.weights.abs_sum() == 0.0 {
            anyhow::bail!("score weights must not all be zero");
        }
        Ok(config)
    }

    /// Small region around central Seoul, used by tests and demos.
    pub fn default_test() -> Self {
        Self {
            region: Bounds::new(37.55, 126.97, 37.56, 126.985),
            cell_size_m: 100.0,
            batch_size: 64,
            ..Self::default()
        }
    }

    pub fn industry(&self, code: &str) -> Option<&IndustryInfo> {
        self.industries.iter().find(|i| i.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let sum = ScoreWeights::default().abs_sum();
        assert!((sum - 1.0).abs() < 1e-12, "abs weight sum = {sum}");
    }

    #[test]
    fn closure_default_prefers_industry_rate() {
        let scoring = ScoringConfig::default();
        assert_eq!(scoring.closure_default("F02"), 0.08);
        assert_eq!(scoring.closure_default("ZZZ"), 0.20);
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let json = r#"{
            "region": { "min_lat": 37.5, "min_lng": 127.0, "max_lat": 37.51, "max_lng": 127.01 },
            "cell_size_m": 250
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.scoring.default_closure_rate, 0.20);
        assert_eq!(config.industries.len(), 22);
        assert!(config.industry("Q12").is_some());
        assert!(!config.sources.has_key("kosis"));
    }

    #[test]
    fn partial_scoring_keeps_industry_rates() {
        let json = r#"{
            "region": { "min_lat": 37.5, "min_lng": 127.0, "max_lat": 37.51, "max_lng": 127.01 },
            "cell_size_m": 100,
            "scoring": { "weights": { "competition": -0.5, "survival": 0.5,
                                      "floating": 0.0, "population": 0.0,
                                      "sales": 0.0, "rent": 0.0 } }
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.scoring.weights.competition, -0.5);
        assert_eq!(config.scoring.default_closure_rate, 0.20);
        assert_eq!(config.scoring.closure_default("F02"), 0.08);
        assert_eq!(config.scoring.industry_closure_rates.len(), 7);

        let json = r#"{
            "region": { "min_lat": 37.5, "min_lng": 127.0, "max_lat": 37.51, "max_lng": 127.01 },
            "cell_size_m": 100,
            "scoring": { "default_closure_rate": 0.3 }
        }"#;
        let scoring = EngineConfig::from_json(json).unwrap().scoring;
        assert_eq!(scoring.closure_default("F02"), 0.08);
        assert_eq!(scoring.closure_default("ZZZ"), 0.3);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let json = r#"{
            "region": { "min_lat": 37.5, "min_lng": 127.0, "max_lat": 37.51, "max_lng": 127.01 },
            "cell_size_m": 100,
            "batch_size": 0
        }"#;
        assert!(EngineConfig::from_json(json).is_err());
    }

    #[test]
    fn has_key_ignores_empty_strings() {
        let sources = DataSourceConfig {
            seoul_open_data_api_key: Some(String::new()),
            kosis_api_key: Some("abc".into()),
            ..Default::default()
        };
        assert!(!sources.has_key("seoul"));
        assert!(sources.has_key("kosis"));
        assert!(!sources.has_key("unknown"));
    }
}
