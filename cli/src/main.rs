#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use abstutil::{prettyprint_usize, Timer};
use anyhow::Result;
use structopt::StructOpt;

use model::{Aborted, Config, ConfigFile, RunSummary};
use reference::{BearingConvention, GeometryKind, GeometryLoader, GeometryStore, ReferenceGeometry};

#[derive(StructOpt)]
#[structopt(name = "trip_flow", about = "Match GPS trips to routes and crossroads")]
enum Command {
    /// Copy every trip passing near a route or point into its own file
    Extract {
        /// A geometry file, or a directory of them
        #[structopt(long)]
        geometry: PathBuf,
        /// Whether the geometry describes routes or points
        #[structopt(long, default_value = "point", parse(try_from_str = parse_kind))]
        kind: GeometryKind,
        /// A directory of trip files
        #[structopt(long)]
        trips: PathBuf,
        /// Extracts go in a subdirectory per geometry
        #[structopt(long)]
        output: PathBuf,
        #[structopt(flatten)]
        options: Options,
    },
    /// Build direction grids and passage records for one point
    Analyze {
        /// A point file
        #[structopt(long)]
        point: PathBuf,
        /// A directory of trip files, already extracted for this point
        #[structopt(long)]
        trips: PathBuf,
        #[structopt(long)]
        output: PathBuf,
        #[structopt(flatten)]
        options: Options,
    },
    /// Analyze every point in a project folder, with points/, screened/, and analysis/
    Batch {
        #[structopt(long)]
        project: PathBuf,
        /// Only analyze these points. Can be repeated.
        #[structopt(long)]
        only: Vec<String>,
        #[structopt(flatten)]
        options: Options,
    },
}

/// Overrides for the defaults or a config file
#[derive(StructOpt)]
struct Options {
    /// A JSON config file
    #[structopt(long)]
    config: Option<PathBuf>,
    /// Write a JSON summary of the run here
    #[structopt(long)]
    summary: Option<PathBuf>,
    /// Only match trips, don't write anything besides the summary
    #[structopt(long)]
    dry_run: bool,

    /// Meters from a fix to the geometry to count as a hit
    #[structopt(long)]
    threshold: Option<f64>,
    #[structopt(long)]
    min_hits: Option<usize>,
    /// Don't check the lines between fixes when no fix is close enough
    #[structopt(long)]
    no_segment_fallback: bool,
    /// Like "MON,TUE", "weekdays", or "1,7"
    #[structopt(long)]
    weekdays: Option<String>,
    /// Meters from a point's center to count as passing through
    #[structopt(long)]
    crossing_threshold: Option<f64>,
    /// toward-center or away-from-center
    #[structopt(long)]
    convention: Option<BearingConvention>,
    /// Degrees a direction may differ from the best branch before it's unknown
    #[structopt(long)]
    max_branch_deviation: Option<f64>,
    /// Meters
    #[structopt(long)]
    cell_size: Option<f64>,
    /// Meters the mesh covers in each direction from the center
    #[structopt(long)]
    half_size: Option<f64>,
    /// Meters between samples along a trajectory
    #[structopt(long)]
    step: Option<f64>,
    #[structopt(long)]
    percentile: Option<f64>,
    #[structopt(long)]
    gamma: Option<f64>,
    /// Starts extract filenames
    #[structopt(long)]
    prefix: Option<String>,
}

impl Options {
    fn config(&self, kind: GeometryKind) -> Result<Config> {
        let mut config = Config::for_kind(kind);
        if let Some(path) = &self.config {
            config.overlay_file(path)?;
        }
        ConfigFile {
            distance_threshold_m: self.threshold,
            min_hits: self.min_hits,
            segment_fallback: if self.no_segment_fallback {
                Some(false)
            } else {
                None
            },
            weekdays: self.weekdays.clone(),
            crossing_threshold_m: self.crossing_threshold,
            convention: self.convention,
            max_branch_deviation_deg: self.max_branch_deviation,
            cell_size_m: self.cell_size,
            mesh_half_size_m: self.half_size,
            sample_step_m: self.step,
            percentile: self.percentile,
            gamma: self.gamma,
            extract_prefix: self.prefix.clone(),
            ..Default::default()
        }
        .apply(&mut config)?;
        config.dry_run = self.dry_run;
        Ok(config)
    }
}

fn parse_kind(x: &str) -> Result<GeometryKind> {
    match x {
        "route" => Ok(GeometryKind::Route),
        "point" => Ok(GeometryKind::Point),
        _ => bail!("Unknown geometry kind {x}; use route or point"),
    }
}

fn main() -> Result<()> {
    abstutil::logger::setup();

    let cmd = Command::from_iter(abstutil::cli_args());

    // Files already being processed finish, but nothing else starts
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            warn!("Cancelling; no grids or summaries will be written");
            cancel.store(true, Ordering::SeqCst);
        })?;
    }

    let mut timer = Timer::new("trip_flow");
    let (summary, summary_path) = match cmd {
        Command::Extract {
            geometry,
            kind,
            trips,
            output,
            options,
        } => {
            let config = options.config(kind)?;
            let loader = GeometryLoader {
                kind,
                convention: config.convention,
                wide_columns: config.columns.coordinates(),
            };
            let (store, failures) = if geometry.is_dir() {
                GeometryStore::load_dir(&geometry, &loader, &mut timer)?
            } else {
                let mut store = GeometryStore::new();
                store.insert(loader.load_file(&geometry)?)?;
                (store, Vec::new())
            };
            if store.is_empty() {
                bail!("No usable geometry in {}", geometry.display());
            }
            let mut summary =
                model::extract_all(&store, &trips, &output, &config, &cancel, &mut timer)?;
            summary
                .aborted
                .extend(failures.into_iter().map(|(name, err)| Aborted {
                    name,
                    error: err.to_string(),
                }));
            (summary, options.summary)
        }
        Command::Analyze {
            point,
            trips,
            output,
            options,
        } => {
            let config = options.config(GeometryKind::Point)?;
            let loader = GeometryLoader {
                kind: GeometryKind::Point,
                convention: config.convention,
                wide_columns: config.columns.coordinates(),
            };
            let point = match loader.load_file(&point)? {
                ReferenceGeometry::Point(x) => x,
                ReferenceGeometry::Route(_) => bail!("{} isn't a point", point.display()),
            };
            let geometry =
                model::analyze_point(&point, &trips, &output, &config, &cancel, &mut timer)?;
            (
                RunSummary {
                    geometries: vec![geometry],
                    ..Default::default()
                },
                options.summary,
            )
        }
        Command::Batch {
            project,
            only,
            options,
        } => {
            let config = options.config(GeometryKind::Point)?;
            let only: Option<BTreeSet<String>> = if only.is_empty() {
                None
            } else {
                Some(only.into_iter().collect())
            };
            let summary = model::analyze_project(
                &project,
                only.as_ref(),
                &config,
                &cancel,
                &mut timer,
            )?;
            (summary, options.summary)
        }
    };

    report(&summary, summary_path.as_deref())
}

fn report(summary: &RunSummary, path: Option<&Path>) -> Result<()> {
    for geometry in &summary.geometries {
        let t = &geometry.totals;
        info!(
            "{}: {} files, {} trips, {} matched, {} saved, {} crossings",
            geometry.name,
            prettyprint_usize(t.files),
            prettyprint_usize(t.candidates - t.short_intervals),
            prettyprint_usize(t.matched),
            prettyprint_usize(t.saved),
            prettyprint_usize(t.crossings)
        );
    }
    for skipped in &summary.skipped {
        warn!("Skipped {}: {:?}", skipped.name, skipped.reasons);
    }
    for aborted in &summary.aborted {
        error!("Gave up on {}: {}", aborted.name, aborted.error);
    }
    if let Some(path) = path {
        fs_err::write(path, summary.to_json()?)?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}
