use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use geom::Distance;
use serde::Serialize;

use reference::NamedPoint;

use crate::{Classification, Crossing, CrossingKind, GpsFix, TripAttributes};

/// One trip passing through a point, as a row of `passages.csv`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PassageRecord {
    pub point: String,
    pub weekday: String,
    pub operation_id: Option<String>,
    pub operation_date: Option<NaiveDate>,
    pub trip_number: Option<i64>,
    pub vehicle_type: Option<String>,
    pub vehicle_use: Option<String>,
    pub branch_in: String,
    pub branch_out: String,
    pub time_before: Option<NaiveDateTime>,
    /// Interpolated when the crossing falls between fixes
    pub time_center: Option<NaiveDateTime>,
    pub time_after: Option<NaiveDateTime>,
    /// Along the fixes, from the one before the crossing to the one after
    pub distance_m: f64,
    /// Only when the two fixes are at distinct times
    pub speed_kmh: Option<f64>,
}

impl PassageRecord {
    /// `fixes` are the ones `crossing` and `classification` index into.
    pub fn new(
        point: &NamedPoint,
        attributes: &TripAttributes,
        fixes: &[&GpsFix],
        crossing: &Crossing,
        classification: &Classification,
    ) -> Self {
        let before = classification.preceding.unwrap_or_else(|| crossing.index());
        let after = classification
            .following
            .unwrap_or_else(|| crossing.index())
            .max(before);

        let mut distance = Distance::ZERO;
        for pair in fixes[before..=after].windows(2) {
            distance = distance + pair[0].pos.haversine_distance(pair[1].pos);
        }

        let time_before = classification.preceding.and_then(|i| fixes[i].timestamp);
        let time_after = classification.following.and_then(|i| fixes[i].timestamp);
        let speed_kmh = match (time_before, time_after) {
            (Some(t1), Some(t2)) => {
                let seconds = (t2 - t1).num_milliseconds() as f64 / 1000.0;
                if seconds > 0.0 {
                    Some(distance.inner_meters() / seconds * 3.6)
                } else {
                    None
                }
            }
            _ => None,
        };

        Self {
            point: point.name.clone(),
            weekday: attributes.weekdays.abbreviations(),
            operation_id: attributes.operation_id.clone(),
            operation_date: attributes.operation_date,
            trip_number: attributes.trip_number,
            vehicle_type: attributes.vehicle_type.clone(),
            vehicle_use: attributes.vehicle_use.clone(),
            branch_in: classification.inflow.describe(point),
            branch_out: classification.outflow.describe(point),
            time_before,
            time_center: time_at_crossing(fixes, crossing),
            time_after,
            distance_m: (distance.inner_meters() * 1000.0).round() / 1000.0,
            speed_kmh,
        }
    }
}

fn time_at_crossing(fixes: &[&GpsFix], crossing: &Crossing) -> Option<NaiveDateTime> {
    match crossing.kind {
        CrossingKind::Fix(idx) => fixes[idx].timestamp,
        CrossingKind::Segment { index, t } => {
            let t1 = fixes[index].timestamp?;
            let t2 = fixes[index + 1].timestamp?;
            let ms = (t2 - t1).num_milliseconds() as f64 * t;
            Some(t1 + Duration::milliseconds(ms.round() as i64))
        }
    }
}

pub fn passages_to_csv(passages: &[PassageRecord]) -> Result<String> {
    let mut out = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut out);
        for passage in passages {
            writer.serialize(passage)?;
        }
        writer.flush()?;
    }
    Ok(String::from_utf8(out)?)
}
