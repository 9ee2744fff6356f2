use geom::{Distance, Pt2D};
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A raw GPS position in degrees. This isn't `geom::LonLat`, because that rounds to 4 decimal
/// places, which is about 10m of latitude.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl Position {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Great-circle distance on a spherical earth
    pub fn haversine_distance(self, other: Position) -> Distance {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();

        let sin_dlat = (d_lat / 2.0).sin();
        let sin_dlon = (d_lon / 2.0).sin();
        let a = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
        let c = 2.0 * a.sqrt().min(1.0).asin();
        Distance::meters(EARTH_RADIUS_METERS * c)
    }
}

/// An equirectangular projection centered on some origin. X points east and Y points north, both
/// in meters. Only accurate for a few kilometers around the origin, which is all we need.
#[derive(Clone, Copy, Debug)]
pub struct LocalFrame {
    origin: Position,
    // Meters per degree of longitude at the origin
    x_scale: f64,
    y_scale: f64,
}

impl LocalFrame {
    pub fn new(origin: Position) -> Self {
        let k = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;
        Self {
            origin,
            x_scale: origin.lat.to_radians().cos() * k,
            y_scale: k,
        }
    }

    pub fn origin(&self) -> Position {
        self.origin
    }

    pub fn to_local(&self, pos: Position) -> Pt2D {
        Pt2D::new(
            (pos.lon - self.origin.lon) * self.x_scale,
            (pos.lat - self.origin.lat) * self.y_scale,
        )
    }

    pub fn to_position(&self, pt: Pt2D) -> Position {
        // Degenerate at the poles; nobody's running buses there
        let x_scale = if self.x_scale == 0.0 {
            self.y_scale
        } else {
            self.x_scale
        };
        Position::new(
            self.origin.lon + pt.x() / x_scale,
            self.origin.lat + pt.y() / self.y_scale,
        )
    }
}

/// The result of projecting a target point onto a line segment.
#[derive(Clone, Copy, Debug)]
pub struct Projection {
    pub pt: Pt2D,
    /// Fraction along the segment, clamped to [0, 1]
    pub t: f64,
    pub distance: Distance,
}

/// Finds the point on segment `p1 -> p2` closest to `target`. A zero-length segment projects to
/// `p1`.
pub fn project_onto_segment(p1: Pt2D, p2: Pt2D, target: Pt2D) -> Projection {
    let dx = p2.x() - p1.x();
    let dy = p2.y() - p1.y();
    let len_squared = dx * dx + dy * dy;
    if len_squared == 0.0 {
        return Projection {
            pt: p1,
            t: 0.0,
            distance: p1.dist_to(target),
        };
    }

    let t = (((target.x() - p1.x()) * dx + (target.y() - p1.y()) * dy) / len_squared)
        .clamp(0.0, 1.0);
    let pt = Pt2D::new(p1.x() + t * dx, p1.y() + t * dy);
    Projection {
        pt,
        t,
        distance: pt.dist_to(target),
    }
}
