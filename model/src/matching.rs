use geom::{Distance, Pt2D};
use serde::Serialize;

use reference::{project_onto_segment, LocalFrame, Position, ReferenceGeometry};

use crate::{Config, GpsFix};

/// Which part of a trip came closest to the geometry. Indices are into the fixes passed to the
/// matcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClosestFeature {
    Fix(usize),
    /// The line from this fix to the next eligible one
    Segment(usize),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchResult {
    pub hit: bool,
    pub hits: usize,
    /// Fixes that passed the weekday filter
    pub eligible: usize,
    /// None if no fix was even considered
    pub min_distance: Option<Distance>,
    pub closest: Option<ClosestFeature>,
}

impl MatchResult {
    fn new() -> Self {
        Self {
            hit: false,
            hits: 0,
            eligible: 0,
            min_distance: None,
            closest: None,
        }
    }

    fn observe(&mut self, distance: Distance, feature: ClosestFeature) {
        if self.min_distance.map(|d| distance < d).unwrap_or(true) {
            self.min_distance = Some(distance);
            self.closest = Some(feature);
        }
    }
}

/// Where a trip passes a point, used to split it into approach and departure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crossing {
    pub kind: CrossingKind,
    /// In the local frame centered on the geometry
    pub pt: Pt2D,
    pub distance: Distance,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CrossingKind {
    /// The closest approach is exactly at this fix
    Fix(usize),
    /// The closest approach is strictly between fix `index` and `index + 1`, `t` of the way
    Segment { index: usize, t: f64 },
}

impl Crossing {
    /// The last fix at or before the crossing point
    pub fn index(&self) -> usize {
        match self.kind {
            CrossingKind::Fix(idx) => idx,
            CrossingKind::Segment { index, .. } => index,
        }
    }
}

pub struct ProximityMatcher<'a> {
    config: &'a Config,
}

impl<'a> ProximityMatcher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Does this trip pass near the geometry? Fixes on days excluded by the weekday filter are
    /// ignored.
    pub fn match_trip(&self, fixes: &[&GpsFix], geometry: &ReferenceGeometry) -> MatchResult {
        let threshold = self.config.distance_threshold;
        let min_hits = self.config.min_hits;
        let reference_points = geometry.reference_points();
        let mut result = MatchResult::new();

        let eligible: Vec<(usize, &GpsFix)> = fixes
            .iter()
            .enumerate()
            .filter(|(_, fix)| self.eligible(fix))
            .map(|(idx, fix)| (idx, *fix))
            .collect();
        result.eligible = eligible.len();

        for (idx, fix) in &eligible {
            let distance = match closest_reference_point(fix.pos, reference_points) {
                Some(x) => x,
                None => continue,
            };
            result.observe(distance, ClosestFeature::Fix(*idx));
            if distance <= threshold {
                result.hits += 1;
                if result.hits >= min_hits {
                    result.hit = true;
                    return result;
                }
            }
        }

        // Only try the lines between fixes when no fix at all was close
        if result.hits > 0 || eligible.len() < 2 || !self.config.segment_fallback {
            result.hit = result.hits >= min_hits;
            return result;
        }

        let frames: Vec<LocalFrame> = reference_points
            .iter()
            .map(|pos| LocalFrame::new(*pos))
            .collect();
        let origin = Pt2D::new(0.0, 0.0);
        // Anything further away is assumed to not pass close, without checking
        let prune_radius = threshold * 3.0;

        for pair in eligible.windows(2) {
            let (idx1, fix1) = pair[0];
            let (_, fix2) = pair[1];

            let mut best: Option<Distance> = None;
            for frame in &frames {
                let pt1 = frame.to_local(fix1.pos);
                let pt2 = frame.to_local(fix2.pos);
                if pt1.dist_to(origin) > prune_radius && pt2.dist_to(origin) > prune_radius {
                    continue;
                }
                let distance = project_onto_segment(pt1, pt2, origin).distance;
                if best.map(|d| distance < d).unwrap_or(true) {
                    best = Some(distance);
                }
            }

            if let Some(distance) = best {
                result.observe(distance, ClosestFeature::Segment(idx1));
                if distance <= threshold {
                    result.hits += 1;
                    if result.hits >= min_hits {
                        result.hit = true;
                        return result;
                    }
                }
            }
        }

        result.hit = result.hits >= min_hits;
        result
    }

    /// Finds the closest approach of a trip to the center of a frame, over every fix and the
    /// lines between them. The first of several equally close candidates wins. None if the trip
    /// never comes within the crossing threshold.
    pub fn crossing(&self, pts: &[Pt2D]) -> Option<Crossing> {
        find_crossing(pts, self.config.crossing_threshold)
    }

    fn eligible(&self, fix: &GpsFix) -> bool {
        match self.config.weekdays {
            Some(days) => fix.weekday().map(|d| days.contains(d)).unwrap_or(false),
            None => true,
        }
    }
}

/// See `ProximityMatcher::crossing`
pub fn find_crossing(pts: &[Pt2D], threshold: Distance) -> Option<Crossing> {
    let origin = Pt2D::new(0.0, 0.0);
    let mut best: Option<Crossing> = None;

    if pts.len() == 1 {
        best = Some(Crossing {
            kind: CrossingKind::Fix(0),
            pt: pts[0],
            distance: pts[0].dist_to(origin),
        });
    }
    for (idx, pair) in pts.windows(2).enumerate() {
        let projection = project_onto_segment(pair[0], pair[1], origin);
        if best
            .map(|b| projection.distance < b.distance)
            .unwrap_or(true)
        {
            let kind = if projection.t <= 0.0 {
                CrossingKind::Fix(idx)
            } else if projection.t >= 1.0 {
                CrossingKind::Fix(idx + 1)
            } else {
                CrossingKind::Segment {
                    index: idx,
                    t: projection.t,
                }
            };
            let pt = match kind {
                CrossingKind::Fix(i) => pts[i],
                CrossingKind::Segment { .. } => projection.pt,
            };
            best = Some(Crossing {
                kind,
                pt,
                distance: projection.distance,
            });
        }
    }

    best.filter(|b| b.distance <= threshold)
}

fn closest_reference_point(pos: Position, reference_points: &[Position]) -> Option<Distance> {
    let mut best: Option<Distance> = None;
    for pt in reference_points {
        let distance = pos.haversine_distance(*pt);
        if best.map(|d| distance < d).unwrap_or(true) {
            best = Some(distance);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    use reference::{BearingConvention, Branch, BranchID, NamedPoint, RoutePolyline};

    use super::*;
    use crate::records::tests::{load_rows, row};
    use crate::Record;

    const CENTER: Position = Position {
        lon: 139.7,
        lat: 35.68,
    };

    fn point_geometry() -> ReferenceGeometry {
        ReferenceGeometry::Point(NamedPoint {
            name: "center".to_string(),
            center: CENTER,
            branches: vec![
                Branch {
                    id: BranchID(0),
                    number: 1,
                    name: "north".to_string(),
                    bearing: 0.0,
                },
                Branch {
                    id: BranchID(1),
                    number: 2,
                    name: "south".to_string(),
                    bearing: 180.0,
                },
            ],
            convention: BearingConvention::TowardCenter,
        })
    }

    // Records at some offset in meters from the center
    fn records_at(offsets: &[(f64, f64)], timestamp: &str) -> Vec<Record> {
        let frame = LocalFrame::new(CENTER);
        let rows: Vec<String> = offsets
            .iter()
            .map(|(x, y)| {
                let pos = frame.to_position(Pt2D::new(*x, *y));
                row("2", "1", pos.lon, pos.lat, timestamp)
            })
            .collect();
        load_rows(&rows)
    }

    fn fixes(records: &[Record]) -> Vec<&GpsFix> {
        records.iter().filter_map(|r| r.fix.as_ref()).collect()
    }

    fn test_config(min_hits: usize, segment_fallback: bool) -> Config {
        Config {
            distance_threshold: Distance::meters(50.0),
            min_hits,
            segment_fallback,
            ..Config::default()
        }
    }

    #[test]
    fn exactly_min_hits() {
        // Two fixes within 50m, the others far away
        let records = records_at(
            &[(0.0, -500.0), (0.0, -20.0), (0.0, 25.0), (0.0, 500.0)],
            "",
        );
        let geometry = point_geometry();

        let config = test_config(2, false);
        let result = ProximityMatcher::new(&config).match_trip(&fixes(&records), &geometry);
        assert!(result.hit);
        assert_eq!(result.hits, 2);

        let config = test_config(3, false);
        let result = ProximityMatcher::new(&config).match_trip(&fixes(&records), &geometry);
        assert!(!result.hit);
        assert_eq!(result.hits, 2);
        assert_abs_diff_eq!(
            result.min_distance.unwrap().inner_meters(),
            20.0,
            epsilon = 0.1
        );
        assert_eq!(result.closest, Some(ClosestFeature::Fix(1)));
    }

    #[test]
    fn segment_fallback_rescues_sparse_trips() {
        // Both fixes are 100m out, but the line between them passes 10m away
        let records = records_at(&[(-100.0, 10.0), (100.0, 10.0)], "");
        let geometry = point_geometry();

        let config = test_config(1, true);
        let result = ProximityMatcher::new(&config).match_trip(&fixes(&records), &geometry);
        assert!(result.hit);
        assert_eq!(result.closest, Some(ClosestFeature::Segment(0)));
        assert_abs_diff_eq!(
            result.min_distance.unwrap().inner_meters(),
            10.0,
            epsilon = 0.1
        );

        let config = test_config(1, false);
        assert!(
            !ProximityMatcher::new(&config)
                .match_trip(&fixes(&records), &geometry)
                .hit
        );
    }

    #[test]
    fn far_endpoints_are_pruned() {
        // Both endpoints are 200m or more out. The line passes only 10m away, but 200m > 3 * 50m.
        let records = records_at(&[(-200.0, 10.0), (210.0, 10.0)], "");
        let config = test_config(1, true);
        let result =
            ProximityMatcher::new(&config).match_trip(&fixes(&records), &point_geometry());
        assert!(!result.hit);
        assert_eq!(result.hits, 0);
        assert_eq!(result.closest, Some(ClosestFeature::Fix(0)));
    }

    #[test]
    fn weekday_filter_ignores_other_days() {
        // 2025-02-24 was a Monday
        let records = records_at(&[(0.0, -10.0), (0.0, 10.0)], "20250224120000");
        let geometry = point_geometry();

        let mut config = test_config(1, true);
        config.weekdays = Some("MON".parse().unwrap());
        assert!(
            ProximityMatcher::new(&config)
                .match_trip(&fixes(&records), &geometry)
                .hit
        );

        config.weekdays = Some("SUN,SAT".parse().unwrap());
        let result = ProximityMatcher::new(&config).match_trip(&fixes(&records), &geometry);
        assert!(!result.hit);
        assert_eq!(result.min_distance, None);

        // No timestamps at all
        let records = records_at(&[(0.0, -10.0), (0.0, 10.0)], "");
        assert!(
            !ProximityMatcher::new(&config)
                .match_trip(&fixes(&records), &geometry)
                .hit
        );
    }

    #[test]
    fn weekday_filter_only_needs_the_date() {
        // Minutes only, and an hour past 23
        for timestamp in ["202502241611", "20250224250000"] {
            let records = records_at(&[(0.0, -10.0), (0.0, 10.0)], timestamp);
            let mut config = test_config(1, true);
            config.weekdays = Some("MON".parse().unwrap());
            let result =
                ProximityMatcher::new(&config).match_trip(&fixes(&records), &point_geometry());
            assert!(result.hit, "{}", timestamp);
            assert_eq!(result.eligible, 2);
        }
    }

    #[test]
    fn routes_match_any_vertex() {
        let frame = LocalFrame::new(CENTER);
        let geometry = ReferenceGeometry::Route(RoutePolyline {
            name: "r".to_string(),
            vertices: vec![
                frame.to_position(Pt2D::new(0.0, 0.0)),
                frame.to_position(Pt2D::new(0.0, 1000.0)),
            ],
        });
        let records = records_at(&[(5.0, 990.0), (5.0, 1010.0)], "");
        let config = test_config(2, false);
        let result = ProximityMatcher::new(&config).match_trip(&fixes(&records), &geometry);
        assert!(result.hit);
    }

    #[test]
    fn crossing_kinds() {
        let threshold = Distance::meters(50.0);

        let pts = vec![
            Pt2D::new(0.0, -100.0),
            Pt2D::new(0.0, 0.0),
            Pt2D::new(0.0, 100.0),
        ];
        let crossing = find_crossing(&pts, threshold).unwrap();
        assert_eq!(crossing.kind, CrossingKind::Fix(1));
        assert_eq!(crossing.index(), 1);

        let pts = vec![Pt2D::new(-40.0, 5.0), Pt2D::new(60.0, 5.0)];
        let crossing = find_crossing(&pts, threshold).unwrap();
        match crossing.kind {
            CrossingKind::Segment { index, t } => {
                assert_eq!(index, 0);
                assert_abs_diff_eq!(t, 0.4);
            }
            x => panic!("expected a segment crossing, got {:?}", x),
        }
        assert_abs_diff_eq!(crossing.pt.x(), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(crossing.distance.inner_meters(), 5.0, epsilon = 1e-3);

        let pts = vec![Pt2D::new(0.0, 80.0), Pt2D::new(0.0, 200.0)];
        assert!(find_crossing(&pts, threshold).is_none());
        assert!(find_crossing(&[], threshold).is_none());
    }

    proptest! {
        #[test]
        fn min_distance_within_threshold_on_hit(
            offsets in proptest::collection::vec((-300.0..300.0f64, -300.0..300.0f64), 1..20),
            min_hits in 1..4usize,
            fallback in any::<bool>(),
        ) {
            let records = records_at(&offsets, "");
            let config = test_config(min_hits, fallback);
            let result = ProximityMatcher::new(&config).match_trip(&fixes(&records), &point_geometry());
            if result.hit {
                prop_assert!(result.min_distance.unwrap() <= config.distance_threshold);
                prop_assert!(result.hits >= min_hits);
            }
        }
    }
}
