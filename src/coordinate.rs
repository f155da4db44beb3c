// Fieldlink - Uplink frame decoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Coordinate correction
//!
//! Converts satellite (WGS-84) coordinates into the offset reference frame
//! (GCJ-02) expected by domestic map consumers. The correction is only
//! defined inside a fixed bounding box; points outside it pass through.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Semi-major axis of the Krasovsky 1940 ellipsoid
const SEMI_MAJOR_AXIS: f64 = 6_378_245.0;

/// First eccentricity squared of the same ellipsoid
const ECCENTRICITY_SQ: f64 = 0.006_693_421_622_965_943;

/// Longitude bounds of the domestic box
pub const DOMESTIC_LON: (f64, f64) = (72.004, 137.8347);

/// Latitude bounds of the domestic box
pub const DOMESTIC_LAT: (f64, f64) = (0.8293, 55.8271);

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the point lies inside the domestic bounding box
    pub fn is_domestic(&self) -> bool {
        (DOMESTIC_LON.0..=DOMESTIC_LON.1).contains(&self.longitude)
            && (DOMESTIC_LAT.0..=DOMESTIC_LAT.1).contains(&self.latitude)
    }
}

/// Correct a satellite coordinate into the regional map frame
///
/// Identity outside the domestic box. Must be applied exactly once per
/// observation: the output is not a fixed point of the function.
pub fn correct(point: GeoPoint) -> GeoPoint {
    if !point.is_domestic() {
        return point;
    }

    let x = point.longitude - 105.0;
    let y = point.latitude - 35.0;
    let mut d_lat = latitude_offset(x, y);
    let mut d_lon = longitude_offset(x, y);

    let rad_lat = point.latitude / 180.0 * PI;
    let mut magic = rad_lat.sin();
    magic = 1.0 - ECCENTRICITY_SQ * magic * magic;
    let sqrt_magic = magic.sqrt();

    d_lat = (d_lat * 180.0)
        / ((SEMI_MAJOR_AXIS * (1.0 - ECCENTRICITY_SQ)) / (magic * sqrt_magic) * PI);
    d_lon = (d_lon * 180.0) / (SEMI_MAJOR_AXIS / sqrt_magic * rad_lat.cos() * PI);

    GeoPoint::new(point.latitude + d_lat, point.longitude + d_lon)
}

fn latitude_offset(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn longitude_offset(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity_outside_box() {
        let cases = [
            GeoPoint::new(48.8566, 2.3522),   // west of the box
            GeoPoint::new(-33.8688, 151.2093), // south and east
            GeoPoint::new(60.0, 100.0),        // north
            GeoPoint::new(0.5, 110.0),         // south
            GeoPoint::new(30.0, 140.0),        // east
        ];
        for p in cases {
            assert_eq!(correct(p), p);
        }
    }

    #[test]
    fn test_box_edges_inclusive() {
        assert!(GeoPoint::new(DOMESTIC_LAT.0, DOMESTIC_LON.0).is_domestic());
        assert!(GeoPoint::new(DOMESTIC_LAT.1, DOMESTIC_LON.1).is_domestic());
        assert!(!GeoPoint::new(DOMESTIC_LAT.1 + 1e-9, 100.0).is_domestic());
        assert!(!GeoPoint::new(30.0, DOMESTIC_LON.0 - 1e-9).is_domestic());
    }

    #[test]
    fn test_known_offset_beijing() {
        // Tiananmen: WGS-84 -> GCJ-02 is roughly +0.0014 lat, +0.0062 lon
        let corrected = correct(GeoPoint::new(39.9087, 116.3975));
        assert_abs_diff_eq!(corrected.latitude - 39.9087, 0.0014, epsilon = 0.0005);
        assert_abs_diff_eq!(corrected.longitude - 116.3975, 0.0062, epsilon = 0.0005);
    }

    #[test]
    fn test_offset_is_small_inside_box() {
        let p = GeoPoint::new(22.586414, 113.913436);
        let c = correct(p);
        assert_ne!(c, p);
        assert!((c.latitude - p.latitude).abs() < 0.01);
        assert!((c.longitude - p.longitude).abs() < 0.01);
    }

    #[test]
    fn test_pure_outside_box() {
        let p = GeoPoint::new(51.5074, -0.1278);
        assert_eq!(correct(p), correct(p));
        assert_eq!(correct(correct(p)), p);
    }
}
