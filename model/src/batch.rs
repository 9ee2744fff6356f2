use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use abstutil::{prettyprint_usize, Counter, Timer};
use anyhow::Result;
use geom::Pt2D;
use serde::Serialize;

use reference::{
    list_csv_files, GeometryKind, GeometryLoader, GeometryStore, LocalFrame, NamedPoint, Position,
    ReferenceGeometry,
};

use crate::{
    grid_to_geojson, matrix_to_csv, passages_to_csv, segment, split_at_crossing, write_extract,
    Config, DirectionClassifier, DirectionLabel, HeatmapScale, LegendStep, MeshAggregator,
    PassageRecord, Phase, ProjectLayout, ProximityMatcher, Record, Skipped,
};

/// The run was interrupted. Nothing partial was merged or written.
#[derive(Debug)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// What happened to the trips in one record stream, or the sum over many.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FileSummary {
    pub files: usize,
    pub rows: usize,
    pub malformed_rows: usize,
    /// Intervals between trip boundaries, including the short ones
    pub candidates: usize,
    pub short_intervals: usize,
    /// No fix fell on an allowed weekday
    pub excluded: usize,
    pub matched: usize,
    /// Extracts actually written
    pub saved: usize,
    pub crossings: usize,
    /// Matched a point, but never came within the crossing threshold
    pub no_crossing: usize,
    pub unknown_inflow: usize,
    pub unknown_outflow: usize,
}

impl FileSummary {
    fn absorb(&mut self, other: &FileSummary) {
        self.files += other.files;
        self.rows += other.rows;
        self.malformed_rows += other.malformed_rows;
        self.candidates += other.candidates;
        self.short_intervals += other.short_intervals;
        self.excluded += other.excluded;
        self.matched += other.matched;
        self.saved += other.saved;
        self.crossings += other.crossings;
        self.no_crossing += other.no_crossing;
        self.unknown_inflow += other.unknown_inflow;
        self.unknown_outflow += other.unknown_outflow;
    }
}

/// Everything learned from one record stream. Results from many streams are merged afterwards.
pub struct FileResult {
    pub summary: FileSummary,
    /// Only for named points
    pub mesh: Option<MeshAggregator>,
    pub transitions: Counter<(DirectionLabel, DirectionLabel)>,
    pub passages: Vec<PassageRecord>,
}

/// Matches record streams against one reference geometry. Routes only produce extracts; named
/// points also get crossings, directions, and meshes.
#[derive(Clone, Copy)]
pub struct GeometryRun<'a> {
    pub geometry: &'a ReferenceGeometry,
    pub config: &'a Config,
    /// Where matched trips go, unless this is a dry run
    pub extract_dir: Option<&'a Path>,
}

impl<'a> GeometryRun<'a> {
    pub fn process_file(&self, path: &Path) -> Result<FileResult> {
        let records = crate::records::load(fs_err::File::open(path)?, &self.config.columns)?;
        let result = self.process_records(&records)?;
        let s = &result.summary;
        info!(
            "{} vs {}: {} rows, {} trips, {} matched, {} crossings",
            path.display(),
            self.geometry.name(),
            prettyprint_usize(s.rows),
            prettyprint_usize(s.candidates - s.short_intervals),
            prettyprint_usize(s.matched),
            prettyprint_usize(s.crossings)
        );
        if s.malformed_rows > 0 {
            warn!(
                "{} has {} malformed rows",
                path.display(),
                prettyprint_usize(s.malformed_rows)
            );
        }
        Ok(result)
    }

    pub fn process_records(&self, records: &[Record]) -> Result<FileResult> {
        let matcher = ProximityMatcher::new(self.config);
        let classifier = DirectionClassifier::new(self.config);
        let segmentation = segment(records);

        let mut summary = FileSummary {
            files: 1,
            rows: records.len(),
            malformed_rows: records.iter().filter(|r| r.fix.is_none()).count(),
            candidates: segmentation.trips.len() + segmentation.short_intervals,
            short_intervals: segmentation.short_intervals,
            ..Default::default()
        };
        let mut mesh = match self.geometry {
            ReferenceGeometry::Point(_) => Some(MeshAggregator::new(self.config)),
            ReferenceGeometry::Route(_) => None,
        };
        let mut transitions = Counter::new();
        let mut passages = Vec::new();

        for trip in &segmentation.trips {
            let fixes = trip.fixes(records);
            let result = matcher.match_trip(&fixes, self.geometry);
            if self.config.weekdays.is_some() && result.eligible == 0 {
                summary.excluded += 1;
                continue;
            }
            if !result.hit {
                continue;
            }
            summary.matched += 1;

            if let Some(dir) = self.extract_dir {
                if !self.config.dry_run {
                    let filename = trip
                        .attributes
                        .filename(&self.config.extract_prefix, self.geometry.name());
                    write_extract(dir, &filename, trip.records(records))?;
                    summary.saved += 1;
                }
            }

            let (point, mesh) = match (self.geometry, mesh.as_mut()) {
                (ReferenceGeometry::Point(point), Some(mesh)) => (point, mesh),
                _ => continue,
            };
            let frame = LocalFrame::new(point.center);
            let pts: Vec<Pt2D> = fixes.iter().map(|fix| frame.to_local(fix.pos)).collect();
            let crossing = if let Some(x) = matcher.crossing(&pts) {
                x
            } else {
                summary.no_crossing += 1;
                continue;
            };
            summary.crossings += 1;

            let classification = classifier.classify(&pts, &crossing, point);
            if classification.inflow == DirectionLabel::Unknown {
                summary.unknown_inflow += 1;
            }
            if classification.outflow == DirectionLabel::Unknown {
                summary.unknown_outflow += 1;
            }

            let (inflow, outflow) = split_at_crossing(&pts, &crossing);
            mesh.add(classification.inflow, Phase::Inflow, &inflow);
            mesh.add(classification.outflow, Phase::Outflow, &outflow);
            transitions.inc((classification.inflow, classification.outflow));
            passages.push(PassageRecord::new(
                point,
                &trip.attributes,
                &fixes,
                &crossing,
                &classification,
            ));
        }

        Ok(FileResult {
            summary,
            mesh,
            transitions,
            passages,
        })
    }

    /// Processes every file in parallel, then merges. Files that can't be read are reported and
    /// skipped. If `cancel` is set before all files start, returns `Cancelled` and drops every
    /// partial result.
    pub fn run(
        &self,
        files: Vec<PathBuf>,
        cancel: &AtomicBool,
        timer: &mut Timer,
    ) -> Result<GeometryResult> {
        let run = *self;
        let outcomes = timer.parallelize(
            &format!("match trips against {}", self.geometry.name()),
            files,
            |path| {
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }
                let result = run.process_file(&path);
                Some((path, result))
            },
        );
        if outcomes.iter().any(|x| x.is_none()) {
            return Err(Cancelled.into());
        }

        let mut merged = GeometryResult {
            name: self.geometry.name().to_string(),
            kind: self.geometry.kind(),
            totals: FileSummary::default(),
            per_file: Vec::new(),
            failed_files: Vec::new(),
            mesh: match self.geometry {
                ReferenceGeometry::Point(_) => Some(MeshAggregator::new(self.config)),
                ReferenceGeometry::Route(_) => None,
            },
            transitions: Counter::new(),
            passages: Vec::new(),
        };
        for (path, result) in outcomes.into_iter().flatten() {
            let result = match result {
                Ok(x) => x,
                Err(err) => {
                    warn!("Skipping {}: {}", path.display(), err);
                    merged.failed_files.push(FailedFile {
                        path: path.display().to_string(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            merged.totals.absorb(&result.summary);
            merged.per_file.push((path.display().to_string(), result.summary));
            if let (Some(ours), Some(theirs)) = (merged.mesh.as_mut(), result.mesh) {
                ours.merge(theirs)?;
            }
            for (pair, count) in result.transitions.borrow() {
                merged.transitions.add(*pair, *count);
            }
            merged.passages.extend(result.passages);
        }
        Ok(merged)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

/// The merged results for one geometry
pub struct GeometryResult {
    pub name: String,
    pub kind: GeometryKind,
    pub totals: FileSummary,
    pub per_file: Vec<(String, FileSummary)>,
    pub failed_files: Vec<FailedFile>,
    pub mesh: Option<MeshAggregator>,
    pub transitions: Counter<(DirectionLabel, DirectionLabel)>,
    pub passages: Vec<PassageRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transition {
    pub inflow: String,
    pub outflow: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeometrySummary {
    pub name: String,
    pub kind: GeometryKind,
    pub totals: FileSummary,
    pub per_file: Vec<FileReport>,
    pub failed_files: Vec<FailedFile>,
    pub transitions: Vec<Transition>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileReport {
    pub path: String,
    #[serde(flatten)]
    pub summary: FileSummary,
}

#[derive(Serialize)]
struct MeshMetadata<'a> {
    center: Position,
    cell_size_m: f64,
    half_size_m: f64,
    grid_size: usize,
    grids: Vec<GridMetadata<'a>>,
}

#[derive(Serialize)]
struct GridMetadata<'a> {
    label: String,
    phase: Phase,
    file: &'a str,
    trajectories: usize,
    scale: HeatmapScale,
    legend: Vec<LegendStep>,
}

impl GeometryResult {
    pub fn summary(&self, geometry: &ReferenceGeometry) -> GeometrySummary {
        let transitions = match geometry {
            ReferenceGeometry::Point(point) => self
                .transitions
                .borrow()
                .iter()
                .map(|((inflow, outflow), count)| Transition {
                    inflow: inflow.describe(point),
                    outflow: outflow.describe(point),
                    count: *count,
                })
                .collect(),
            ReferenceGeometry::Route(_) => Vec::new(),
        };
        GeometrySummary {
            name: self.name.clone(),
            kind: self.kind,
            totals: self.totals.clone(),
            per_file: self
                .per_file
                .iter()
                .map(|(path, summary)| FileReport {
                    path: path.clone(),
                    summary: summary.clone(),
                })
                .collect(),
            failed_files: self.failed_files.clone(),
            transitions,
        }
    }

    /// For a named point, writes into `dir`:
    ///
    /// - `{name}_{label}_{phase}.csv` percentage grids, north up
    /// - `{name}_heatmap.json` describing the layout and color scale of every grid
    /// - `{name}_cells.geojson` with every nonzero cell of every grid
    /// - `passages.csv`
    ///
    /// Returns the files written. Routes have nothing to write.
    pub fn write_outputs(
        &self,
        point: &NamedPoint,
        config: &Config,
        dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let mesh = if let Some(x) = &self.mesh {
            x
        } else {
            return Ok(Vec::new());
        };
        fs_err::create_dir_all(dir)?;
        let mut written = Vec::new();

        let layout = mesh.layout();
        let grid_size = layout.grid_size();
        let frame = LocalFrame::new(point.center);
        let mut filenames = Vec::new();
        let mut grids = Vec::new();
        let mut features = Vec::new();
        for ((label, phase), grid) in mesh.grids() {
            let label = label.describe(point);
            let rows = grid.percentages(grid_size);
            let scale = HeatmapScale::new(rows.iter().flatten().cloned(), config);

            let filename = format!("{}_{}_{}.csv", self.name, label, phase);
            let path = dir.join(&filename);
            fs_err::write(&path, matrix_to_csv(&rows)?)?;
            written.push(path);

            let fc = grid_to_geojson(
                &rows,
                &layout,
                &frame,
                &scale,
                &[("label", label.clone()), ("phase", phase.to_string())],
            );
            features.extend(fc.features);

            filenames.push(filename);
            grids.push((label, *phase, grid.trajectories, scale));
        }

        let metadata = MeshMetadata {
            center: point.center,
            cell_size_m: layout.cell_size.inner_meters(),
            half_size_m: layout.half_size.inner_meters(),
            grid_size,
            grids: grids
                .into_iter()
                .zip(filenames.iter())
                .map(|((label, phase, trajectories, scale), file)| GridMetadata {
                    label,
                    phase,
                    file,
                    trajectories,
                    legend: scale.legend(),
                    scale,
                })
                .collect(),
        };
        let path = dir.join(format!("{}_heatmap.json", self.name));
        fs_err::write(&path, serde_json::to_string_pretty(&metadata)?)?;
        written.push(path);

        let geojson = geojson::GeoJson::FeatureCollection(geojson::FeatureCollection {
            features,
            bbox: None,
            foreign_members: None,
        });
        let path = dir.join(format!("{}_cells.geojson", self.name));
        fs_err::write(&path, serde_json::to_string_pretty(&geojson)?)?;
        written.push(path);

        let path = dir.join("passages.csv");
        fs_err::write(&path, passages_to_csv(&self.passages)?)?;
        written.push(path);

        Ok(written)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Aborted {
    pub name: String,
    pub error: String,
}

/// Everything a run did, meant to be written as JSON
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub geometries: Vec<GeometrySummary>,
    /// Named points without a complete set of inputs
    pub skipped: Vec<Skipped>,
    /// Geometries that couldn't be used at all
    pub aborted: Vec<Aborted>,
}

impl RunSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn abort(&mut self, name: &str, err: &anyhow::Error) {
        error!("Giving up on {}: {}", name, err);
        self.aborted.push(Aborted {
            name: name.to_string(),
            error: err.to_string(),
        });
    }
}

/// Matches every trip file in `trip_dir` against every geometry in `store`. Matched trips are
/// extracted to `extract_dir/<geometry>/`. The thresholds in `config` are used as given; start
/// from `Config::for_kind` for the usual route or point defaults.
pub fn extract_all(
    store: &GeometryStore,
    trip_dir: &Path,
    extract_dir: &Path,
    config: &Config,
    cancel: &AtomicBool,
    timer: &mut Timer,
) -> Result<RunSummary> {
    config.validate()?;
    let files = list_csv_files(trip_dir)?;
    let mut summary = RunSummary::default();
    for geometry in store.iter() {
        let dir = extract_dir.join(geometry.name());
        let run = GeometryRun {
            geometry,
            config,
            extract_dir: Some(&dir),
        };
        let result = run.run(files.clone(), cancel, timer)?;
        info!(
            "{}: {} of {} trips matched",
            geometry.name(),
            prettyprint_usize(result.totals.matched),
            prettyprint_usize(result.totals.candidates - result.totals.short_intervals)
        );
        summary.geometries.push(result.summary(geometry));
    }
    Ok(summary)
}

/// Analyzes one named point against every trip file in `trip_dir`, writing grids and passages to
/// `output_dir`.
pub fn analyze_point(
    point: &NamedPoint,
    trip_dir: &Path,
    output_dir: &Path,
    config: &Config,
    cancel: &AtomicBool,
    timer: &mut Timer,
) -> Result<GeometrySummary> {
    let files = list_csv_files(trip_dir)?;
    if files.is_empty() {
        warn!("No trip files in {}", trip_dir.display());
    }
    let geometry = ReferenceGeometry::Point(point.clone());
    let run = GeometryRun {
        geometry: &geometry,
        config,
        extract_dir: None,
    };
    let result = run.run(files, cancel, timer)?;
    if config.dry_run {
        info!("Dry run, not writing anything for {}", point.name);
    } else {
        for path in result.write_outputs(point, config, output_dir)? {
            info!("Wrote {}", path.display());
        }
    }
    Ok(result.summary(&geometry))
}

/// Analyzes every complete named point in a project folder. A point that fails to load or
/// analyze is recorded and doesn't stop the others; cancellation stops everything.
pub fn analyze_project(
    root: &Path,
    only: Option<&BTreeSet<String>>,
    config: &Config,
    cancel: &AtomicBool,
    timer: &mut Timer,
) -> Result<RunSummary> {
    let layout = ProjectLayout::scan(root, only)?;
    let mut summary = RunSummary {
        skipped: layout.skipped,
        ..Default::default()
    };
    let loader = GeometryLoader {
        kind: GeometryKind::Point,
        convention: config.convention,
        wide_columns: config.columns.coordinates(),
    };

    for target in layout.targets {
        if cancel.load(Ordering::SeqCst) {
            return Err(Cancelled.into());
        }
        let point = match fs_err::File::open(&target.geometry_file)
            .map_err(anyhow::Error::from)
            .and_then(|file| loader.load(&target.name, file))
        {
            Ok(ReferenceGeometry::Point(point)) => point,
            Ok(ReferenceGeometry::Route(_)) => {
                summary.abort(&target.name, &anyhow!("not a named point"));
                continue;
            }
            Err(err) => {
                summary.abort(&target.name, &err);
                continue;
            }
        };
        match analyze_point(
            &point,
            &target.trip_dir,
            &target.output_dir,
            config,
            cancel,
            timer,
        ) {
            Ok(x) => summary.geometries.push(x),
            Err(err) => {
                if err.downcast_ref::<Cancelled>().is_some() {
                    return Err(err);
                }
                summary.abort(&target.name, &err);
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use geom::Distance;
    use tempdir::TempDir;

    use reference::{BearingConvention, Branch, BranchID, RoutePolyline};

    use super::*;
    use crate::records::tests::{load_rows, row};

    fn crossroad() -> NamedPoint {
        let branches = [("north", 0.0), ("east", 90.0), ("south", 180.0), ("west", 270.0)]
            .into_iter()
            .enumerate()
            .map(|(idx, (name, bearing))| Branch {
                id: BranchID(idx),
                number: idx as u32 + 1,
                name: name.to_string(),
                bearing,
            })
            .collect();
        NamedPoint {
            name: "shibuya".to_string(),
            center: Position::new(139.7016, 35.6580),
            branches,
            convention: BearingConvention::TowardCenter,
        }
    }

    // Northbound through the center, then a trip that stays far to the east
    fn rows(point: &NamedPoint) -> Vec<String> {
        let frame = LocalFrame::new(point.center);
        let mut rows = Vec::new();
        for (trip, dx) in [("1", 0.0), ("2", 500.0)] {
            for i in -2..=2 {
                let pos = frame.to_position(Pt2D::new(dx, 100.0 * i as f64));
                let flag = match i {
                    -2 => "0",
                    2 => "1",
                    _ => "2",
                };
                rows.push(row(
                    flag,
                    trip,
                    pos.lon,
                    pos.lat,
                    &format!("202502240800{:02}", 20 + 10 * i),
                ));
            }
        }
        rows
    }

    #[test]
    fn point_pipeline() {
        let point = crossroad();
        let records = load_rows(&rows(&point));
        let geometry = ReferenceGeometry::Point(point.clone());
        let config = Config::default();
        let run = GeometryRun {
            geometry: &geometry,
            config: &config,
            extract_dir: None,
        };
        let result = run.process_records(&records).unwrap();

        assert_eq!(result.summary.candidates, 2);
        assert_eq!(result.summary.matched, 1);
        assert_eq!(result.summary.saved, 0);
        assert_eq!(result.summary.crossings, 1);
        assert_eq!(result.passages.len(), 1);

        let north = DirectionLabel::Branch(BranchID(0));
        let south = DirectionLabel::Branch(BranchID(2));
        assert_eq!(result.transitions.get((north, south)), 1);

        let mesh = result.mesh.unwrap();
        assert_eq!(mesh.get(north, Phase::Inflow).unwrap().trajectories, 1);
        assert_eq!(mesh.get(south, Phase::Outflow).unwrap().trajectories, 1);
        assert!(mesh.get(north, Phase::Outflow).is_none());
    }

    #[test]
    fn weekday_filter_excludes_trips() {
        let point = crossroad();
        let records = load_rows(&rows(&point));
        let geometry = ReferenceGeometry::Point(point);
        // 2025-02-24 is a Monday
        let config = Config {
            weekdays: Some("SUN".parse().unwrap()),
            ..Config::default()
        };
        let run = GeometryRun {
            geometry: &geometry,
            config: &config,
            extract_dir: None,
        };
        let result = run.process_records(&records).unwrap();
        assert_eq!(result.summary.excluded, 2);
        assert_eq!(result.summary.matched, 0);
        assert!(result.mesh.unwrap().is_empty());
    }

    #[test]
    fn extract_keeps_the_given_thresholds() {
        let frame = LocalFrame::new(Position::new(139.7016, 35.6580));
        let route = RoutePolyline {
            name: "loop".to_string(),
            vertices: vec![
                frame.to_position(Pt2D::new(0.0, 0.0)),
                frame.to_position(Pt2D::new(1000.0, 0.0)),
            ],
        };
        let mut store = GeometryStore::new();
        store.insert(ReferenceGeometry::Route(route)).unwrap();

        // Only one fix, 20m from a vertex. The route preset of 10m and 4 hits would miss this.
        let rows: Vec<String> = [(20.0, "0"), (500.0, "2"), (500.0, "1")]
            .into_iter()
            .enumerate()
            .map(|(i, (y, flag))| {
                let pos = frame.to_position(Pt2D::new(0.0, y));
                row(flag, "5", pos.lon, pos.lat, &format!("202502240800{:02}", i))
            })
            .collect();
        let dir = TempDir::new("extract_all").unwrap();
        let trips = dir.path().join("trips");
        fs_err::create_dir_all(&trips).unwrap();
        fs_err::write(trips.join("day.csv"), rows.join("\n")).unwrap();

        let config = Config {
            distance_threshold: Distance::meters(30.0),
            min_hits: 1,
            ..Config::for_kind(GeometryKind::Route)
        };
        let summary = extract_all(
            &store,
            &trips,
            &dir.path().join("out"),
            &config,
            &AtomicBool::new(false),
            &mut Timer::throwaway(),
        )
        .unwrap();
        assert_eq!(summary.geometries[0].totals.matched, 1);
        assert_eq!(summary.geometries[0].totals.saved, 1);

        let summary = extract_all(
            &store,
            &trips,
            &dir.path().join("out"),
            &Config {
                dry_run: true,
                ..Config::for_kind(GeometryKind::Route)
            },
            &AtomicBool::new(false),
            &mut Timer::throwaway(),
        )
        .unwrap();
        assert_eq!(summary.geometries[0].totals.matched, 0);
    }
}
