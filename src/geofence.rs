use crate::models::{GeoPoint, Location, NoteWithLocation};

/// Mean earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters (haversine).
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Inactive locations never contain anything.
pub fn location_contains(location: &Location, point: GeoPoint) -> bool {
    location.is_active && distance_m(location.point(), point) <= f64::from(location.radius)
}

/// Notes whose location fence contains `point`, in the order given.
pub fn targets_at(targets: &[NoteWithLocation], point: GeoPoint) -> Vec<NoteWithLocation> {
    targets
        .iter()
        .filter(|target| {
            let center = GeoPoint::new(target.latitude, target.longitude);
            distance_m(center, point) <= f64::from(target.radius)
        })
        .cloned()
        .collect()
}
