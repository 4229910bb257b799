//! Great-circle distance between GPS fixes.

use stroller_types::GpsFix;

/// Mean Earth radius in meters, as used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance in meters between two coordinate pairs.
///
/// Pure and total over finite inputs; non-finite coordinates propagate as
/// NaN, so callers validate before use.
///
/// # Examples
///
/// ```
/// use stroller_core::geo::haversine_meters;
///
/// let d = haversine_meters(10.0, 10.0, 10.001, 10.001);
/// assert!((156.0..158.0).contains(&d));
/// assert_eq!(haversine_meters(45.0, 45.0, 45.0, 45.0), 0.0);
/// ```
#[must_use]
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Distance in meters between two retained fixes.
#[must_use]
pub fn distance_between(a: &GpsFix, b: &GpsFix) -> f64 {
    haversine_meters(a.latitude, a.longitude, b.latitude, b.longitude)
}
