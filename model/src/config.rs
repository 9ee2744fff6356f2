use std::path::Path;

use anyhow::Result;
use geom::Distance;
use serde::{Deserialize, Serialize};

use reference::{BearingConvention, CoordinateColumns, DaysOfWeek, GeometryKind};

/// Zero-based column positions in a record stream row. These are a contract with whatever split
/// the raw archives, so they're configurable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnLayout {
    pub operation_date: usize,
    pub operation_id: usize,
    pub vehicle_type: usize,
    pub vehicle_use: usize,
    /// YYYYMMDDHHMMSS
    pub timestamp: usize,
    pub trip_number: usize,
    pub status_flag: usize,
    pub longitude: usize,
    pub latitude: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            operation_date: 2,
            operation_id: 3,
            vehicle_type: 4,
            vehicle_use: 5,
            timestamp: 6,
            trip_number: 8,
            status_flag: 12,
            longitude: 14,
            latitude: 15,
        }
    }
}

impl ColumnLayout {
    pub fn coordinates(&self) -> CoordinateColumns {
        CoordinateColumns {
            lon: self.longitude,
            lat: self.latitude,
        }
    }
}

/// Everything tunable about one run. Built once, then only borrowed.
#[derive(Clone, Debug)]
pub struct Config {
    /// A fix this close to a reference point counts as a hit
    pub distance_threshold: Distance,
    pub min_hits: usize,
    /// Check the lines between fixes when no single fix is close enough
    pub segment_fallback: bool,
    /// Trips are only eligible on these days. Fixes without a timestamp never match when this is
    /// set.
    pub weekdays: Option<DaysOfWeek>,

    /// The closest approach to a point's center must be within this to count as a crossing
    pub crossing_threshold: Distance,
    pub convention: BearingConvention,
    /// If the best branch is still further off than this many degrees, call the direction
    /// unknown
    pub max_branch_deviation: Option<f64>,

    pub cell_size: Distance,
    /// The mesh covers this far from the center in every direction
    pub mesh_half_size: Distance,
    pub sample_step: Distance,

    pub percentile: f64,
    pub gamma: f64,
    pub min_opacity: f64,
    pub max_opacity: f64,

    pub columns: ColumnLayout,
    pub extract_prefix: String,
    /// Report matches, but don't write anything
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            distance_threshold: Distance::meters(30.0),
            min_hits: 1,
            segment_fallback: true,
            weekdays: None,

            crossing_threshold: Distance::meters(50.0),
            convention: BearingConvention::TowardCenter,
            max_branch_deviation: None,

            cell_size: Distance::meters(25.0),
            mesh_half_size: Distance::meters(1000.0),
            sample_step: Distance::meters(10.0),

            percentile: 99.0,
            gamma: 1.0,
            min_opacity: 0.18,
            max_opacity: 0.55,

            columns: ColumnLayout::default(),
            extract_prefix: "2nd".to_string(),
            dry_run: false,
        }
    }
}

impl Config {
    /// Routes are densely sampled, so a tighter radius with more hits works better than the
    /// defaults for points.
    pub fn for_kind(kind: GeometryKind) -> Self {
        match kind {
            GeometryKind::Point => Self::default(),
            GeometryKind::Route => Self {
                distance_threshold: Distance::meters(10.0),
                min_hits: 4,
                ..Self::default()
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("distance threshold", self.distance_threshold),
            ("crossing threshold", self.crossing_threshold),
            ("cell size", self.cell_size),
            ("mesh half size", self.mesh_half_size),
            ("sample step", self.sample_step),
        ] {
            if value <= Distance::ZERO {
                bail!("The {name} must be positive, not {value}");
            }
        }
        if self.min_hits == 0 {
            bail!("The minimum hit count must be at least 1");
        }
        if self.cell_size > self.mesh_half_size * 2.0 {
            bail!(
                "A {} cell doesn't fit in a mesh {} across",
                self.cell_size,
                self.mesh_half_size * 2.0
            );
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            bail!("The percentile must be in [0, 100], not {}", self.percentile);
        }
        if !(self.gamma > 0.0 && self.gamma.is_finite()) {
            bail!("Gamma must be positive, not {}", self.gamma);
        }
        if !(0.0 <= self.min_opacity
            && self.min_opacity <= self.max_opacity
            && self.max_opacity <= 1.0)
        {
            bail!(
                "Opacity bounds {} to {} must be ordered and within [0, 1]",
                self.min_opacity,
                self.max_opacity
            );
        }
        if let Some(degrees) = self.max_branch_deviation {
            if !(0.0..=180.0).contains(&degrees) {
                bail!("The maximum branch deviation must be in [0, 180], not {degrees}");
            }
        }
        if let Some(weekdays) = self.weekdays {
            if weekdays.is_empty() {
                bail!("The weekday filter can't exclude every day");
            }
        }
        Ok(())
    }

    /// Reads a JSON config file on top of these settings.
    pub fn overlay_file(&mut self, path: &Path) -> Result<()> {
        let file: ConfigFile = serde_json::from_str(&fs_err::read_to_string(path)?)
            .map_err(|err| anyhow!("Bad config file {}: {}", path.display(), err))?;
        file.apply(self)
    }
}

/// The on-disk form of `Config`, with plain meters. Anything omitted keeps its current value.
#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub distance_threshold_m: Option<f64>,
    pub min_hits: Option<usize>,
    pub segment_fallback: Option<bool>,
    pub weekdays: Option<String>,
    pub crossing_threshold_m: Option<f64>,
    pub convention: Option<BearingConvention>,
    pub max_branch_deviation_deg: Option<f64>,
    pub cell_size_m: Option<f64>,
    pub mesh_half_size_m: Option<f64>,
    pub sample_step_m: Option<f64>,
    pub percentile: Option<f64>,
    pub gamma: Option<f64>,
    pub min_opacity: Option<f64>,
    pub max_opacity: Option<f64>,
    pub columns: Option<ColumnLayout>,
    pub extract_prefix: Option<String>,
}

impl ConfigFile {
    pub fn apply(self, config: &mut Config) -> Result<()> {
        fn meters(x: f64) -> Result<Distance> {
            if !x.is_finite() {
                bail!("Distance {x} isn't finite");
            }
            Ok(Distance::meters(x))
        }

        if let Some(x) = self.distance_threshold_m {
            config.distance_threshold = meters(x)?;
        }
        if let Some(x) = self.min_hits {
            config.min_hits = x;
        }
        if let Some(x) = self.segment_fallback {
            config.segment_fallback = x;
        }
        if let Some(x) = self.weekdays {
            config.weekdays = Some(x.parse()?);
        }
        if let Some(x) = self.crossing_threshold_m {
            config.crossing_threshold = meters(x)?;
        }
        if let Some(x) = self.convention {
            config.convention = x;
        }
        if let Some(x) = self.max_branch_deviation_deg {
            config.max_branch_deviation = Some(x);
        }
        if let Some(x) = self.cell_size_m {
            config.cell_size = meters(x)?;
        }
        if let Some(x) = self.mesh_half_size_m {
            config.mesh_half_size = meters(x)?;
        }
        if let Some(x) = self.sample_step_m {
            config.sample_step = meters(x)?;
        }
        if let Some(x) = self.percentile {
            config.percentile = x;
        }
        if let Some(x) = self.gamma {
            config.gamma = x;
        }
        if let Some(x) = self.min_opacity {
            config.min_opacity = x;
        }
        if let Some(x) = self.max_opacity {
            config.max_opacity = x;
        }
        if let Some(x) = self.columns {
            config.columns = x;
        }
        if let Some(x) = self.extract_prefix {
            config.extract_prefix = x;
        }
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
        Config::for_kind(GeometryKind::Route).validate().unwrap();
    }

    #[test]
    fn file_overlays_defaults() {
        let file: ConfigFile = serde_json::from_str(
            r#"{
                "distance_threshold_m": 15.0,
                "weekdays": "MON,TUE",
                "convention": "AwayFromCenter",
                "columns": { "longitude": 1, "latitude": 2 }
            }"#,
        )
        .unwrap();
        let mut config = Config::default();
        file.apply(&mut config).unwrap();

        assert_eq!(config.distance_threshold, Distance::meters(15.0));
        assert_eq!(config.min_hits, 1);
        assert_eq!(config.convention, BearingConvention::AwayFromCenter);
        assert_eq!(config.weekdays.unwrap().abbreviations(), "MON-TUE");
        assert_eq!(config.columns.longitude, 1);
        // Unspecified columns keep their defaults
        assert_eq!(config.columns.status_flag, 12);
    }

    #[test]
    fn rejects_nonsense() {
        assert!(serde_json::from_str::<ConfigFile>(r#"{"threshold": 1}"#).is_err());

        let mut config = Config::default();
        config.gamma = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.min_opacity = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.min_hits = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cell_size = Distance::ZERO;
        assert!(config.validate().is_err());
    }
}
