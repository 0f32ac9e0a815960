//! Geospatial and attenuation functions
//!
//! Units used throughout:
//! - coordinates in decimal degrees
//! - distances and depths in kilometres
//! - peak ground acceleration (PGA) in cm/s² (gal)
//!
//! All functions are pure and total.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Point on the Earth's surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north
    pub lat: f64,
    /// Longitude in degrees, positive east
    pub lon: f64,
}

impl GeoPoint {
    /// Create new point
    #[inline]
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle surface distance to another point, in kilometres
    #[inline]
    #[must_use]
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        great_circle_km(*self, *other)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}, {:.3}", self.lat, self.lon)
    }
}

/// Great-circle surface distance between two points (haversine), in kilometres
#[must_use]
pub fn great_circle_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Depth-adjusted distance from a surface point to a hypocentre, in kilometres
#[inline]
#[must_use]
pub fn geological_distance_km(surface_km: f64, depth_km: f64) -> f64 {
    surface_km.abs().hypot(depth_km.max(0.0))
}

/// Peak ground acceleration in cm/s² at `surface_km` from the epicentre
///
/// Attenuation after Fukushima & Tanaka (1990), evaluated on the
/// depth-adjusted distance:
///
/// ```text
/// log10(PGA) = 0.41·M − log10(R + 0.032·10^(0.41·M)) − 0.0034·R + 1.30
/// ```
#[must_use]
pub fn pga(magnitude: f64, surface_km: f64, depth_km: f64) -> f64 {
    let r = geological_distance_km(surface_km, depth_km);
    let near_source = 0.032 * 10f64.powf(0.41 * magnitude);
    let log_pga = 0.41 * magnitude - (r + near_source).log10() - 0.0034 * r + 1.30;
    10f64.powf(log_pga)
}

/// Shaking intensity expected at `surface_km` from the epicentre
#[inline]
#[must_use]
pub fn intensity(magnitude: f64, surface_km: f64, depth_km: f64) -> Mmi {
    Mmi::from_pga(pga(magnitude, surface_km, depth_km))
}

/// Modified Mercalli intensity level (I through XII)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct Mmi(u8);

const ROMAN: [&str; 12] = [
    "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII",
];

impl Mmi {
    /// Lowest level: not felt
    pub const MIN: Mmi = Mmi(1);
    /// Highest level: total destruction
    pub const MAX: Mmi = Mmi(12);

    /// Create level, clamped to I..=XII
    #[inline]
    #[must_use]
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 12))
    }

    /// Numeric level
    #[inline]
    #[must_use]
    pub fn level(self) -> u8 {
        self.0
    }

    /// Convert PGA (cm/s²) to an intensity level
    ///
    /// Wald et al. (1999): the steep branch applies from V upward, the
    /// shallow branch below. Both meet at V.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_pga(pga_gal: f64) -> Self {
        if !pga_gal.is_finite() || pga_gal <= 0.0 {
            return Self::MIN;
        }
        let log = pga_gal.log10();
        let steep = 3.66 * log - 1.66;
        let value = if steep >= 5.0 { steep } else { 2.20 * log + 1.0 };
        Self(value.round().clamp(1.0, 12.0) as u8)
    }
}

impl Default for Mmi {
    fn default() -> Self {
        Self(5)
    }
}

impl From<u8> for Mmi {
    fn from(level: u8) -> Self {
        Self::new(level)
    }
}

impl From<Mmi> for u8 {
    fn from(mmi: Mmi) -> Self {
        mmi.0
    }
}

impl fmt::Display for Mmi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ROMAN[usize::from(self.0 - 1)])
    }
}
