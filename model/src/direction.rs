use std::fmt;

use geom::Pt2D;
use serde::{Deserialize, Serialize};

use reference::{
    bearing, circular_difference, reverse_bearing, BearingConvention, BranchID, NamedPoint,
};

use crate::{Config, Crossing, CrossingKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Inflow,
    Outflow,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Inflow => write!(f, "in"),
            Phase::Outflow => write!(f, "out"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DirectionLabel {
    Branch(BranchID),
    /// Nothing before or after the crossing to tell, or no branch was close enough
    Unknown,
}

impl DirectionLabel {
    /// Uses the branch number from the file, like "b3", or "unknown"
    pub fn describe(&self, point: &NamedPoint) -> String {
        match self {
            DirectionLabel::Branch(id) => format!("b{}", point.branch(*id).number),
            DirectionLabel::Unknown => "unknown".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub inflow: DirectionLabel,
    pub outflow: DirectionLabel,
    /// The fix used to judge the approach
    pub preceding: Option<usize>,
    /// The fix used to judge the departure
    pub following: Option<usize>,
}

pub struct DirectionClassifier<'a> {
    config: &'a Config,
}

impl<'a> DirectionClassifier<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// `pts` are the trip's fixes in the point's local frame, and `crossing` was found among
    /// them.
    pub fn classify(&self, pts: &[Pt2D], crossing: &Crossing, point: &NamedPoint) -> Classification {
        let (before, after) = match crossing.kind {
            CrossingKind::Fix(idx) => (idx.checked_sub(1), idx + 1),
            CrossingKind::Segment { index, .. } => (Some(index), index + 1),
        };

        // If a neighbor sits exactly on the crossing, look one further out
        let preceding = before.and_then(|start| {
            (0..=start)
                .rev()
                .find(|i| bearing(pts[*i], crossing.pt).is_some())
        });
        let following = (after..pts.len()).find(|i| bearing(crossing.pt, pts[*i]).is_some());

        // Directions of travel
        let inflow_travel = preceding.and_then(|i| bearing(pts[i], crossing.pt));
        let outflow_travel = following.and_then(|i| bearing(crossing.pt, pts[i]));

        let (inflow, outflow) = match point.convention {
            BearingConvention::TowardCenter => {
                (inflow_travel, outflow_travel.map(reverse_bearing))
            }
            BearingConvention::AwayFromCenter => {
                (inflow_travel.map(reverse_bearing), outflow_travel)
            }
        };

        Classification {
            inflow: inflow
                .map(|b| self.closest_branch(b, point))
                .unwrap_or(DirectionLabel::Unknown),
            outflow: outflow
                .map(|b| self.closest_branch(b, point))
                .unwrap_or(DirectionLabel::Unknown),
            preceding,
            following,
        }
    }

    /// The branch with the most similar bearing. Ties go to the earliest branch.
    pub fn closest_branch(&self, bearing: f64, point: &NamedPoint) -> DirectionLabel {
        let mut best: Option<(BranchID, f64)> = None;
        for branch in &point.branches {
            let diff = circular_difference(bearing, branch.bearing);
            if best.map(|(_, d)| diff < d).unwrap_or(true) {
                best = Some((branch.id, diff));
            }
        }
        match best {
            Some((id, diff)) => {
                if self
                    .config
                    .max_branch_deviation
                    .map(|max| diff > max)
                    .unwrap_or(false)
                {
                    DirectionLabel::Unknown
                } else {
                    DirectionLabel::Branch(id)
                }
            }
            None => DirectionLabel::Unknown,
        }
    }
}
