use geom::Pt2D;

/// Wraps any angle in degrees into [0, 360).
pub fn normalize_degrees(degrees: f64) -> f64 {
    let result = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if result >= 360.0 {
        0.0
    } else {
        result
    }
}

pub fn reverse_bearing(degrees: f64) -> f64 {
    normalize_degrees(degrees + 180.0)
}

/// Compass bearing of the vector `from -> to` in a local frame, clockwise from north. None if the
/// points coincide.
pub fn bearing(from: Pt2D, to: Pt2D) -> Option<f64> {
    let dx = to.x() - from.x();
    let dy = to.y() - from.y();
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    Some(normalize_degrees(dx.atan2(dy).to_degrees()))
}

/// The absolute angle between two bearings, in [0, 180].
pub fn circular_difference(a: f64, b: f64) -> f64 {
    ((a - b + 180.0).rem_euclid(360.0) - 180.0).abs()
}
