//! Meter/degree conversions shared by grid construction and radius queries.
//!
//! Both sides must use the same relation, otherwise a radius query would
//! select a different footprint than the one the grid was cut with.

use crate::types::{Bounds, LatLng};

/// Approximate length of one degree of latitude, in meters.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

pub fn meters_to_degrees_lat(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Longitude degrees shrink with cos(latitude) away from the equator.
pub fn meters_to_degrees_lng(meters: f64, lat: f64) -> f64 {
    meters / (METERS_PER_DEGREE * lat.to_radians().cos())
}

/// Distance in meters from `p` to the nearest point of `rect`, measured in
/// an equirectangular frame centred on `p`. Zero when `p` lies inside.
pub fn distance_to_rect_m(p: LatLng, rect: &Bounds) -> f64 {
    let nearest_lat = p.lat.clamp(rect.min_lat, rect.max_lat);
    let nearest_lng = p.lng.clamp(rect.min_lng, rect.max_lng);
    let dy = (p.lat - nearest_lat) * METERS_PER_DEGREE;
    let dx = (p.lng - nearest_lng) * METERS_PER_DEGREE * p.lat.to_radians().cos();
    dx.hypot(dy)
}

/// True when a circle of `radius_m` around `center` touches `rect`.
pub fn circle_intersects_rect(center: LatLng, radius_m: f64, rect: &Bounds) -> bool {
    distance_to_rect_m(center, rect) <= radius_m
}

/// Degree-space box enclosing the circle, used as a cheap SQL prefilter.
pub fn circle_bbox(center: LatLng, radius_m: f64) -> Bounds {
    let dlat = meters_to_degrees_lat(radius_m);
    let dlng = meters_to_degrees_lng(radius_m, center.lat);
    Bounds::new(center.lat - dlat, center.lng - dlng, center.lat + dlat, center.lng + dlng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longitude_delta_grows_with_latitude() {
        let at_equator = meters_to_degrees_lng(100.0, 0.0);
        let at_seoul = meters_to_degrees_lng(100.0, 37.5);
        assert!((at_equator - meters_to_degrees_lat(100.0)).abs() < 1e-12);
        assert!(at_seoul > at_equator * 1.2, "cos correction missing: {at_seoul}");
    }

    #[test]
    fn point_inside_rect_has_zero_distance() {
        let rect = Bounds::new(37.5, 127.0, 37.501, 127.001);
        let inside = LatLng::new(37.5005, 127.0005);
        assert_eq!(distance_to_rect_m(inside, &rect), 0.0);
        assert!(circle_intersects_rect(inside, 0.0, &rect));
    }

    #[test]
    fn distance_north_of_rect_is_metric() {
        let rect = Bounds::new(37.5, 127.0, 37.501, 127.001);
        let north = LatLng::new(37.501 + meters_to_degrees_lat(50.0), 127.0005);
        let d = distance_to_rect_m(north, &rect);
        assert!((d - 50.0).abs() < 1e-6, "expected ~50m, got {d}");
        assert!(!circle_intersects_rect(north, 49.0, &rect));
        assert!(circle_intersects_rect(north, 51.0, &rect));
    }

    #[test]
    fn bbox_encloses_circle() {
        let c = LatLng::new(37.55, 126.98);
        let bbox = circle_bbox(c, 500.0);
        let east_edge = LatLng::new(c.lat, bbox.max_lng);
        let d = distance_to_rect_m(east_edge, &Bounds::new(c.lat, c.lng, c.lat, c.lng));
        assert!((d - 500.0).abs() < 1e-6, "east edge should be 500m away, got {d}");
    }
}
