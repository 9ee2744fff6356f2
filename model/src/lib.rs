//! Matches vehicle GPS trips against reference geometry, then works out which way matched trips
//! enter and leave named points and where they go nearby.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod batch;
mod config;
mod direction;
mod extract;
mod heatmap;
mod matching;
mod mesh;
mod passage;
mod project;
mod records;
mod segment;
mod trajectory;
mod trip;

pub use self::batch::{
    analyze_point, analyze_project, extract_all, Aborted, Cancelled, FailedFile, FileReport,
    FileResult, FileSummary, GeometryResult, GeometryRun, GeometrySummary, RunSummary, Transition,
};
pub use self::config::{ColumnLayout, Config, ConfigFile};
pub use self::direction::{Classification, DirectionClassifier, DirectionLabel, Phase};
pub use self::extract::write_extract;
pub use self::heatmap::{
    grid_to_geojson, percentile, CellStyle, HeatmapScale, LegendStep, PALETTE,
};
pub use self::matching::{
    find_crossing, ClosestFeature, Crossing, CrossingKind, MatchResult, ProximityMatcher,
};
pub use self::mesh::{matrix_to_csv, CellID, MeshAggregator, MeshGrid, MeshLayout};
pub use self::passage::{passages_to_csv, PassageRecord};
pub use self::project::{ProjectLayout, SkipReason, Skipped, Target};
pub use self::records::{load as load_records, GpsFix, Record, StatusFlag};
pub use self::segment::{boundaries, candidate_intervals, segment, Segmentation};
pub use self::trajectory::{resample, split_at_crossing};
pub use self::trip::{Trip, TripAttributes};
