use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{normalize_degrees, GeometryError, Position};

/// Index into `NamedPoint::branches`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchID(pub usize);

/// How the bearings stored for each branch should be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BearingConvention {
    /// The bearing points from the periphery toward the center; it's the direction of travel of
    /// a vehicle arriving along that branch.
    TowardCenter,
    /// The bearing points from the center out along the branch. The crossroad sampling tool
    /// writes files this way.
    AwayFromCenter,
}

impl Default for BearingConvention {
    fn default() -> Self {
        BearingConvention::TowardCenter
    }
}

impl FromStr for BearingConvention {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "toward-center" | "inbound" => Ok(BearingConvention::TowardCenter),
            "away-from-center" | "outbound" => Ok(BearingConvention::AwayFromCenter),
            x => bail!("Unknown bearing convention {x}; use toward-center or away-from-center"),
        }
    }
}

impl fmt::Display for BearingConvention {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BearingConvention::TowardCenter => write!(f, "toward-center"),
            BearingConvention::AwayFromCenter => write!(f, "away-from-center"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchID,
    pub number: u32,
    pub name: String,
    /// Degrees clockwise from north, in [0, 360)
    pub bearing: f64,
}

/// A crossroad or other named location with two or more approaches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedPoint {
    pub name: String,
    pub center: Position,
    pub branches: Vec<Branch>,
    pub convention: BearingConvention,
}

impl NamedPoint {
    pub fn branch(&self, id: BranchID) -> &Branch {
        &self.branches[id.0]
    }
}

/// Reads rows of `id, center_lon, center_lat, branch_no, branch_name, bearing_degrees`. The first
/// row defines the center, and every row is a branch. A header row is optional.
pub fn load<R: std::io::Read>(
    name: &str,
    reader: R,
    convention: BearingConvention,
) -> Result<NamedPoint> {
    let mut center: Option<Position> = None;
    let mut branches = Vec::new();

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    for (row_idx, rec) in csv_reader.records().enumerate() {
        let rec = rec?;
        let Some(row) = Row::parse(&rec) else {
            // Only the very first row may be a header
            if row_idx > 0 {
                warn!("{name}: skipping unparseable row {}: {:?}", row_idx + 1, rec);
            }
            continue;
        };

        if center.is_none() {
            center = Some(Position::new(row.center_lon, row.center_lat));
        }
        branches.push(Branch {
            id: BranchID(branches.len()),
            number: row.branch_no,
            name: row.branch_name,
            bearing: normalize_degrees(row.bearing),
        });
    }

    let center = match center {
        Some(x) => x,
        None => {
            return Err(GeometryError::MissingCenter {
                name: name.to_string(),
            }
            .into());
        }
    };
    if branches.len() < 2 {
        return Err(GeometryError::TooFewBranches {
            name: name.to_string(),
            found: branches.len(),
        }
        .into());
    }

    Ok(NamedPoint {
        name: name.to_string(),
        center,
        branches,
        convention,
    })
}

struct Row {
    center_lon: f64,
    center_lat: f64,
    branch_no: u32,
    branch_name: String,
    bearing: f64,
}

impl Row {
    fn parse(rec: &csv::StringRecord) -> Option<Row> {
        if rec.len() < 6 {
            return None;
        }
        let number = |idx: usize| -> Option<f64> {
            let x = rec[idx].trim_start_matches('\u{feff}').parse::<f64>().ok()?;
            x.is_finite().then_some(x)
        };
        let branch_no = number(3)?;
        if branch_no < 0.0 || branch_no.fract() != 0.0 {
            return None;
        }
        Some(Row {
            center_lon: number(1)?,
            center_lat: number(2)?,
            branch_no: branch_no as u32,
            branch_name: rec[4].to_string(),
            bearing: number(5)?,
        })
    }
}
