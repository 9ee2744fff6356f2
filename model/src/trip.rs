use std::ops::Range;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use reference::DaysOfWeek;

use crate::{GpsFix, Record};

/// A contiguous piece of a record stream believed to be one vehicle movement.
#[derive(Clone, Debug)]
pub struct Trip {
    /// Indices into the record stream
    pub rows: Range<usize>,
    pub attributes: TripAttributes,
}

impl Trip {
    pub fn records<'a>(&self, all: &'a [Record]) -> &'a [Record] {
        &all[self.rows.clone()]
    }

    /// The usable fixes, in order. Malformed rows are skipped.
    pub fn fixes<'a>(&self, all: &'a [Record]) -> Vec<&'a GpsFix> {
        self.records(all)
            .iter()
            .filter_map(|rec| rec.fix.as_ref())
            .collect()
    }
}

/// Summarizes the metadata scattered across a trip's rows. The first value present wins.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TripAttributes {
    /// Days from the operation date of any row
    pub weekdays: DaysOfWeek,
    pub operation_id: Option<String>,
    pub operation_date: Option<NaiveDate>,
    pub trip_number: Option<i64>,
    pub vehicle_type: Option<String>,
    pub vehicle_use: Option<String>,
}

impl TripAttributes {
    pub fn derive(records: &[Record]) -> Self {
        let mut attrs = Self::default();
        for fix in records.iter().filter_map(|rec| rec.fix.as_ref()) {
            if let Some(date) = fix.operation_date {
                attrs.weekdays.insert(date.weekday());
            }
            first(&mut attrs.operation_id, &fix.operation_id);
            first(&mut attrs.operation_date, &fix.operation_date);
            first(&mut attrs.trip_number, &fix.trip_number);
            first(&mut attrs.vehicle_type, &fix.vehicle_type);
            first(&mut attrs.vehicle_use, &fix.vehicle_use);
        }
        attrs
    }

    /// Deterministic name for an extract of this trip, like
    /// `2nd_shibuya_MON_ID000000001234_20250224_t003_E01_F02.csv`. Missing values become
    /// `UNK`, zeros, or `00000000`.
    pub fn filename(&self, prefix: &str, geometry: &str) -> String {
        let operation_id = self
            .operation_id
            .as_deref()
            .map(sanitize)
            .unwrap_or_default();
        let date = self
            .operation_date
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| "00000000".to_string());
        format!(
            "{}_{}_{}_ID{:0>12}_{}_t{:03}_E{:0>2}_F{:0>2}.csv",
            prefix,
            sanitize(geometry),
            self.weekdays.abbreviations(),
            operation_id,
            date,
            self.trip_number.unwrap_or(0),
            self.vehicle_type.as_deref().unwrap_or("0"),
            self.vehicle_use.as_deref().unwrap_or("0"),
        )
    }
}

fn first<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if slot.is_none() {
        *slot = value.clone();
    }
}

// Keep filenames portable
fn sanitize(x: &str) -> String {
    x.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
