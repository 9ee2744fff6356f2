use geom::{Distance, Pt2D};

use crate::{Crossing, CrossingKind};

/// Splits a trip at its crossing. The approach runs from the first fix up to the crossing point,
/// and the departure from the crossing point to the last fix.
pub fn split_at_crossing(pts: &[Pt2D], crossing: &Crossing) -> (Vec<Pt2D>, Vec<Pt2D>) {
    match crossing.kind {
        CrossingKind::Fix(idx) => (pts[..=idx].to_vec(), pts[idx..].to_vec()),
        CrossingKind::Segment { index, .. } => {
            let mut inflow = pts[..=index].to_vec();
            inflow.push(crossing.pt);
            let mut outflow = vec![crossing.pt];
            outflow.extend_from_slice(&pts[index + 1..]);
            (inflow, outflow)
        }
    }
}

/// Samples along a polyline so long, straight stretches between fixes still cover every cell they
/// pass through. Each line of length `len` gets `floor(len / step) + 1` evenly spaced samples,
/// including both ends when there's more than one. Zero-length lines and lone points produce
/// nothing.
pub fn resample(pts: &[Pt2D], step: Distance) -> Vec<Pt2D> {
    let mut result = Vec::new();
    for pair in pts.windows(2) {
        let (p1, p2) = (pair[0], pair[1]);
        let len = p1.dist_to(p2);
        if len == Distance::ZERO {
            continue;
        }
        let n = ((len / step).floor() as usize + 1).max(1);
        if n == 1 {
            result.push(p1);
            continue;
        }
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            result.push(Pt2D::new(
                p1.x() + t * (p2.x() - p1.x()),
                p1.y() + t * (p2.y() - p1.y()),
            ));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::find_crossing;

    #[test]
    fn samples_include_endpoints() {
        let pts = vec![Pt2D::new(0.0, 0.0), Pt2D::new(40.0, 0.0)];
        let samples = resample(&pts, Distance::meters(10.0));
        let xs: Vec<f64> = samples.iter().map(|pt| pt.x()).collect();
        assert_eq!(xs, vec![0.0, 10.0, 20.0, 30.0, 40.0]);

        // Shorter than one step
        let pts = vec![Pt2D::new(0.0, 0.0), Pt2D::new(4.0, 0.0)];
        assert_eq!(resample(&pts, Distance::meters(10.0)), vec![Pt2D::new(0.0, 0.0)]);

        assert!(resample(&[Pt2D::new(1.0, 1.0)], Distance::meters(10.0)).is_empty());
        assert!(resample(&[Pt2D::new(1.0, 1.0), Pt2D::new(1.0, 1.0)], Distance::meters(10.0))
            .is_empty());
    }

    #[test]
    fn split_between_fixes() {
        let pts = vec![
            Pt2D::new(-100.0, 5.0),
            Pt2D::new(-20.0, 5.0),
            Pt2D::new(30.0, 5.0),
        ];
        let crossing = find_crossing(&pts, Distance::meters(50.0)).unwrap();
        let (inflow, outflow) = split_at_crossing(&pts, &crossing);
        assert_eq!(inflow.len(), 3);
        assert_eq!(outflow.len(), 2);
        assert_abs_diff_eq!(inflow[2].x(), 0.0, epsilon = 1e-3);
        assert_eq!(inflow[2], outflow[0]);
        assert_eq!(outflow[1], pts[2]);
    }

    #[test]
    fn split_at_a_fix() {
        let pts = vec![
            Pt2D::new(0.0, -100.0),
            Pt2D::new(0.0, 0.0),
            Pt2D::new(0.0, 100.0),
        ];
        let crossing = find_crossing(&pts, Distance::meters(50.0)).unwrap();
        let (inflow, outflow) = split_at_crossing(&pts, &crossing);
        assert_eq!(inflow, pts[..2].to_vec());
        assert_eq!(outflow, pts[1..].to_vec());
    }
}
