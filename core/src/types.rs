//! Shared primitive types used across the engine.

use serde::{Deserialize, Serialize};

/// Sequential identifier of a grid cell, assigned at build time starting at 1.
pub type CellId = i64;

/// Categorical business identifier, e.g. "Q12" (coffee shop).
pub type IndustryCode = String;

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Axis-aligned rectangle in degrees. Used both for the analysed region
/// and for the bounds of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl Bounds {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self { min_lat, min_lng, max_lat, max_lng }
    }

    pub fn mid_lat(&self) -> f64 {
        (self.min_lat + self.max_lat) / 2.0
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(self.mid_lat(), (self.min_lng + self.max_lng) / 2.0)
    }

    /// Half-open containment: the north and east edges belong to the
    /// neighbouring cell.
    pub fn contains(&self, p: LatLng) -> bool {
        p.lat >= self.min_lat && p.lat < self.max_lat && p.lng >= self.min_lng && p.lng < self.max_lng
    }
}

/// Quarter label attached to a score run, e.g. "2024-Q3".
pub fn quarter_label(date: chrono::NaiveDate) -> String {
    use chrono::Datelike;
    format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1)
}
