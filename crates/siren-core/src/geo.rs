//! Great-circle math on decimal-degree positions.
//!
//! Distances between two phones are scaled by a correction factor: raw
//! haversine distance between two independent GPS fixes overstates the true
//! separation, and the factor is tuned empirically.

use siren_protocol::Position;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default scale applied to raw haversine distance between two devices.
pub const DEFAULT_CORRECTION_FACTOR: f64 = 0.4;

/// Raw haversine distance in meters.
#[must_use]
pub fn haversine_meters(a: Position, b: Position) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Device-to-device distance in meters with the default correction factor.
#[must_use]
pub fn distance_meters(a: Position, b: Position) -> f64 {
    corrected_distance(a, b, DEFAULT_CORRECTION_FACTOR)
}

/// Device-to-device distance in meters scaled by `factor`.
#[must_use]
pub fn corrected_distance(a: Position, b: Position, factor: f64) -> f64 {
    haversine_meters(a, b) * factor
}

/// Initial bearing from `a` towards `b`, in degrees clockwise from north.
#[must_use]
pub fn initial_bearing_degrees(a: Position, b: Position) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Linear interpolation in lat/lng space; `fraction` 0 is `a`, 1 is `b`.
#[must_use]
pub fn interpolate(a: Position, b: Position, fraction: f64) -> Position {
    Position::new(
        a.lat + (b.lat - a.lat) * fraction,
        a.lng + (b.lng - a.lng) * fraction,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONDON: Position = Position::new(51.5074, -0.1278);
    const PARIS: Position = Position::new(48.8566, 2.3522);

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(distance_meters(LONDON, LONDON), 0.0);
        assert_eq!(haversine_meters(PARIS, PARIS), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (LONDON, PARIS),
            (Position::new(0.0, 0.0), Position::new(0.0, 1.0)),
            (Position::new(-33.86, 151.21), Position::new(40.71, -74.0)),
        ];

        for (a, b) in pairs {
            assert!((distance_meters(a, b) - distance_meters(b, a)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_known_distance() {
        // London to Paris is roughly 343.5 km great-circle.
        let raw = haversine_meters(LONDON, PARIS);
        assert!((raw - 343_500.0).abs() < 1_000.0, "got {raw}");

        let corrected = distance_meters(LONDON, PARIS);
        assert!((corrected - raw * 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_custom_correction_factor() {
        let raw = haversine_meters(LONDON, PARIS);
        assert!((corrected_distance(LONDON, PARIS, 1.0) - raw).abs() < 1e-9);
    }

    #[test]
    fn test_bearing() {
        let origin = Position::new(0.0, 0.0);
        assert!((initial_bearing_degrees(origin, Position::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((initial_bearing_degrees(origin, Position::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((initial_bearing_degrees(origin, Position::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((initial_bearing_degrees(origin, Position::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_endpoints() {
        assert_eq!(interpolate(LONDON, PARIS, 0.0), LONDON);
        let end = interpolate(LONDON, PARIS, 1.0);
        assert!((end.lat - PARIS.lat).abs() < 1e-12 && (end.lng - PARIS.lng).abs() < 1e-12);

        let mid = interpolate(Position::new(0.0, 0.0), Position::new(2.0, 4.0), 0.5);
        assert_eq!(mid, Position::new(1.0, 2.0));
    }
}
