use anyhow::Result;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

use reference::Position;

use crate::ColumnLayout;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusFlag {
    /// "0", a trip starts at this row
    Origin,
    /// "1", a trip ends after this row
    Destination,
    /// "2"
    Pass,
    Other,
}

impl StatusFlag {
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "0" => StatusFlag::Origin,
            "1" => StatusFlag::Destination,
            "2" => StatusFlag::Pass,
            _ => StatusFlag::Other,
        }
    }
}

/// One usable GPS sample. Everything besides the position is optional, since upstream data is
/// often patchy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub timestamp: Option<NaiveDateTime>,
    /// The first 8 digits of the timestamp. Still usable when the time of day is cut off or
    /// out of range.
    pub service_date: Option<NaiveDate>,
    pub pos: Position,
    pub flag: StatusFlag,
    pub trip_number: Option<i64>,
    pub operation_id: Option<String>,
    pub operation_date: Option<NaiveDate>,
    /// Just the digits of the original field
    pub vehicle_type: Option<String>,
    pub vehicle_use: Option<String>,
}

impl GpsFix {
    pub fn weekday(&self) -> Option<Weekday> {
        self.service_date.map(|d| d.weekday())
    }
}

/// A row from a record stream. The raw fields are kept so extracts can write them back out
/// unchanged.
#[derive(Clone, Debug)]
pub struct Record {
    pub raw: csv::ByteRecord,
    /// None if the row doesn't have usable coordinates
    pub fix: Option<GpsFix>,
}

impl Record {
    pub fn parse(raw: csv::ByteRecord, columns: &ColumnLayout) -> Self {
        let fix = parse_fix(&raw, columns);
        Self { raw, fix }
    }
}

/// Reads one record stream: CSV without a header, rows in order. Rows that don't make sense are
/// kept with no fix.
pub fn load<R: std::io::Read>(reader: R, columns: &ColumnLayout) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    for rec in csv_reader.byte_records() {
        records.push(Record::parse(rec?, columns));
    }
    Ok(records)
}

fn parse_fix(raw: &csv::ByteRecord, columns: &ColumnLayout) -> Option<GpsFix> {
    let field = |idx: usize| get_field(raw, idx);

    let lon = parse_finite(field(columns.longitude)?)?;
    let lat = parse_finite(field(columns.latitude)?)?;

    Some(GpsFix {
        timestamp: field(columns.timestamp).and_then(parse_timestamp),
        service_date: field(columns.timestamp).and_then(parse_date),
        pos: Position::new(lon, lat),
        flag: field(columns.status_flag)
            .map(StatusFlag::parse)
            .unwrap_or(StatusFlag::Other),
        trip_number: field(columns.trip_number).and_then(parse_trip_number),
        operation_id: field(columns.operation_id).map(|x| x.to_string()),
        operation_date: field(columns.operation_date).and_then(parse_date),
        vehicle_type: field(columns.vehicle_type).and_then(digits),
        vehicle_use: field(columns.vehicle_use).and_then(digits),
    })
}

fn get_field(raw: &csv::ByteRecord, idx: usize) -> Option<&str> {
    let value = std::str::from_utf8(raw.get(idx)?).ok()?;
    let value = value.trim_start_matches('\u{feff}').trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_finite(token: &str) -> Option<f64> {
    let x = token.parse::<f64>().ok()?;
    x.is_finite().then_some(x)
}

fn parse_timestamp(token: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(token.get(0..14)?, "%Y%m%d%H%M%S").ok()
}

fn parse_date(token: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(token.get(0..8)?, "%Y%m%d").ok()
}

// Sometimes written as a float, like "3.0"
fn parse_trip_number(token: &str) -> Option<i64> {
    if let Ok(x) = token.parse::<i64>() {
        return Some(x);
    }
    let x = parse_finite(token)?;
    if x.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(x.trunc() as i64)
}

fn digits(token: &str) -> Option<String> {
    let result: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Builds a row in the default layout.
    pub fn row(flag: &str, trip: &str, lon: f64, lat: f64, timestamp: &str) -> String {
        format!(
            "x,x,20250224,1234,1,2,{timestamp},x,{trip},x,x,x,{flag},x,{lon},{lat}"
        )
    }

    pub fn load_rows(rows: &[String]) -> Vec<Record> {
        load(rows.join("\n").as_bytes(), &ColumnLayout::default()).unwrap()
    }

    #[test]
    fn parse_all_fields() {
        let records = load_rows(&[row("0", "3.0", 139.7, 35.68, "20250224081530")]);
        let fix = records[0].fix.as_ref().unwrap();
        assert_eq!(fix.flag, StatusFlag::Origin);
        assert_eq!(fix.trip_number, Some(3));
        assert_eq!(fix.pos, Position::new(139.7, 35.68));
        assert_eq!(fix.operation_id.as_deref(), Some("1234"));
        assert_eq!(
            fix.operation_date,
            Some(NaiveDate::from_ymd_opt(2025, 2, 24).unwrap())
        );
        assert_eq!(fix.weekday(), Some(Weekday::Mon));
        assert_eq!(fix.vehicle_type.as_deref(), Some("1"));
        assert_eq!(fix.vehicle_use.as_deref(), Some("2"));
    }

    #[test]
    fn malformed_rows_are_kept_without_a_fix() {
        let records = load(
            "short,row\nx,x,x,x,x,x,x,x,x,x,x,x,0,x,abc,35.0\n".as_bytes(),
            &ColumnLayout::default(),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.fix.is_none()));
        assert_eq!(&records[0].raw[0], b"short");
    }

    #[test]
    fn patchy_metadata() {
        let records = load_rows(&[row("9", "", 139.7, 35.68, "garbage")]);
        let fix = records[0].fix.as_ref().unwrap();
        assert_eq!(fix.flag, StatusFlag::Other);
        assert_eq!(fix.trip_number, None);
        assert_eq!(fix.timestamp, None);
        assert_eq!(fix.weekday(), None);
    }

    #[test]
    fn weekday_without_a_time_of_day() {
        for timestamp in ["202502241611", "20250224250000", "20250224"] {
            let records = load_rows(&[row("2", "1", 139.7, 35.68, timestamp)]);
            let fix = records[0].fix.as_ref().unwrap();
            assert_eq!(fix.timestamp, None, "{}", timestamp);
            assert_eq!(fix.weekday(), Some(Weekday::Mon), "{}", timestamp);
        }
    }
}
