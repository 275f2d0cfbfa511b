use serde::{Deserialize, Serialize};

/// Mean Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// A single geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl Waypoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_latitude(self.latitude) && is_valid_longitude(self.longitude)
    }

    /// Pulls both coordinates into their legal ranges. NaN collapses to 0.
    pub fn clamped(&self) -> Self {
        Self {
            latitude: clamp_or_zero(self.latitude, MIN_LATITUDE, MAX_LATITUDE),
            longitude: clamp_or_zero(self.longitude, MIN_LONGITUDE, MAX_LONGITUDE),
        }
    }

    /// Linear interpolation of latitude and longitude independently.
    pub fn lerp(&self, other: &Waypoint, fraction: f64) -> Waypoint {
        Waypoint {
            latitude: self.latitude + fraction * (other.latitude - self.latitude),
            longitude: self.longitude + fraction * (other.longitude - self.longitude),
        }
    }
}

impl From<(f64, f64)> for Waypoint {
    fn from((latitude, longitude): (f64, f64)) -> Self {
        Self { latitude, longitude }
    }
}

pub fn is_valid_latitude(latitude: f64) -> bool {
    (MIN_LATITUDE..=MAX_LATITUDE).contains(&latitude)
}

pub fn is_valid_longitude(longitude: f64) -> bool {
    (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&longitude)
}

fn clamp_or_zero(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(min, max)
    }
}

/// Great-circle distance between two points in nautical miles.
pub fn haversine_nm(from: &Waypoint, to: &Waypoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (to.longitude - from.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_NM * c
}

/// Initial true bearing from `from` towards `to`, normalized into [0, 360).
pub fn initial_bearing(from: &Waypoint, to: &Waypoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Maps any finite angle into [0, 360).
pub fn normalize_degrees(degrees: f64) -> f64 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_for_same_point() {
        let p = Waypoint::new(51.9225, 4.4792);
        assert_eq!(haversine_nm(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let a = Waypoint::new(0.0, 0.0);
        let b = Waypoint::new(1.0, 0.0);
        let d = haversine_nm(&a, &b);
        // One degree of arc is ~60 nm
        assert!((d - 60.04).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn test_haversine_antipodal_is_half_circumference() {
        let a = Waypoint::new(0.0, 0.0);
        let b = Waypoint::new(0.0, 180.0);
        let d = haversine_nm(&a, &b);
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_NM).abs() < 1e-6);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Waypoint::new(0.0, 0.0);
        assert!((initial_bearing(&origin, &Waypoint::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((initial_bearing(&origin, &Waypoint::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((initial_bearing(&origin, &Waypoint::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((initial_bearing(&origin, &Waypoint::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_degrees_range() {
        for value in [-720.0, -360.0, -1e-15, 0.0, 359.999, 360.0, 725.5] {
            let n = normalize_degrees(value);
            assert!((0.0..360.0).contains(&n), "{} -> {}", value, n);
        }
    }

    #[test]
    fn test_clamped_pulls_into_range() {
        let p = Waypoint::new(200.0, -400.0).clamped();
        assert_eq!(p, Waypoint::new(90.0, -180.0));
        assert!(Waypoint::new(f64::NAN, 10.0).clamped().is_valid());
    }
}
