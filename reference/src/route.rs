use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{GeometryError, Position};

/// Where longitude and latitude live in a wide row. Route samples are sometimes saved with the
/// same layout as the record streams they were cut from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateColumns {
    pub lon: usize,
    pub lat: usize,
}

impl Default for CoordinateColumns {
    fn default() -> Self {
        Self { lon: 14, lat: 15 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutePolyline {
    pub name: String,
    pub vertices: Vec<Position>,
}

/// Reads `lon, lat` rows without a header. Rows wide enough to hold `wide_columns` are read from
/// those columns instead. Anything unparseable is skipped.
pub fn load<R: std::io::Read>(
    name: &str,
    reader: R,
    wide_columns: CoordinateColumns,
) -> Result<RoutePolyline> {
    let mut vertices = Vec::new();
    let mut skipped = 0;
    let wide_len = wide_columns.lon.max(wide_columns.lat) + 1;

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    for rec in csv_reader.records() {
        let rec = rec?;
        let (lon, lat) = if rec.len() >= wide_len {
            (&rec[wide_columns.lon], &rec[wide_columns.lat])
        } else if rec.len() >= 2 {
            (&rec[0], &rec[1])
        } else {
            skipped += 1;
            continue;
        };
        match (parse_coordinate(lon), parse_coordinate(lat)) {
            (Some(lon), Some(lat)) => vertices.push(Position::new(lon, lat)),
            _ => {
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        debug!("{name}: skipped {skipped} rows without coordinates");
    }
    if vertices.len() < 2 {
        return Err(GeometryError::TooFewVertices {
            name: name.to_string(),
            found: vertices.len(),
        }
        .into());
    }
    Ok(RoutePolyline {
        name: name.to_string(),
        vertices,
    })
}

fn parse_coordinate(token: &str) -> Option<f64> {
    let x = token.trim_start_matches('\u{feff}').parse::<f64>().ok()?;
    x.is_finite().then_some(x)
}
