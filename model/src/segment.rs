//! Splits one record stream, which may cover a whole day of operation, into individual trips.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::{Record, StatusFlag, Trip, TripAttributes};

/// Indices where a trip starts or ends. Always includes 0 and the number of records, sorted and
/// without duplicates.
///
/// - An Origin flag starts a trip at its own row
/// - A Destination flag ends a trip after its row
/// - A change in trip number starts a trip, relative to the last row that had one
///
/// Rows without a usable fix never create boundaries.
pub fn boundaries(records: &[Record]) -> Vec<usize> {
    let mut result = BTreeSet::new();
    result.insert(0);
    result.insert(records.len());

    let mut prev_trip_number = None;
    for (idx, rec) in records.iter().enumerate() {
        let fix = if let Some(x) = &rec.fix {
            x
        } else {
            continue;
        };
        match fix.flag {
            StatusFlag::Origin => {
                result.insert(idx);
            }
            StatusFlag::Destination => {
                result.insert(idx + 1);
            }
            StatusFlag::Pass | StatusFlag::Other => {}
        }

        if let Some(trip_number) = fix.trip_number {
            if prev_trip_number.map(|prev| prev != trip_number).unwrap_or(false) {
                result.insert(idx);
            }
            prev_trip_number = Some(trip_number);
        }
    }
    result.into_iter().collect()
}

/// Consecutive pairs of boundaries. Together these cover every record exactly once.
pub fn candidate_intervals(boundaries: &[usize]) -> Vec<Range<usize>> {
    boundaries
        .windows(2)
        .map(|pair| pair[0]..pair[1])
        .collect()
}

pub struct Segmentation {
    pub trips: Vec<Trip>,
    /// Candidates dropped for having fewer than 2 rows
    pub short_intervals: usize,
}

pub fn segment(records: &[Record]) -> Segmentation {
    let mut trips = Vec::new();
    let mut short_intervals = 0;
    for interval in candidate_intervals(&boundaries(records)) {
        if interval.len() < 2 {
            short_intervals += 1;
            continue;
        }
        trips.push(Trip {
            attributes: TripAttributes::derive(&records[interval.clone()]),
            rows: interval,
        });
    }
    Segmentation {
        trips,
        short_intervals,
    }
}
