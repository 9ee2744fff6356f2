//! A project folder holds everything needed to analyze a set of named points:
//!
//! - `points/<name>/` has the point's CSV and a `.jpg` or `.jpeg` map image
//! - `screened/<name>/` has the trip files already matched to that point
//! - results go to `analysis/<name>/`

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use reference::list_csv_files;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SkipReason {
    MissingTripFolder,
    MissingGeometryFolder,
    MissingGeometryFile,
    MissingImage,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::MissingTripFolder => write!(f, "no folder of trips"),
            SkipReason::MissingGeometryFolder => write!(f, "no folder for the point"),
            SkipReason::MissingGeometryFile => write!(f, "no CSV describing the point"),
            SkipReason::MissingImage => write!(f, "no map image"),
        }
    }
}

impl std::error::Error for SkipReason {}

/// One named point with all of its inputs present
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub name: String,
    pub geometry_file: PathBuf,
    pub image: PathBuf,
    pub trip_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Skipped {
    pub name: String,
    pub reasons: Vec<SkipReason>,
}

pub struct ProjectLayout {
    pub targets: Vec<Target>,
    pub skipped: Vec<Skipped>,
}

impl ProjectLayout {
    /// Every name appearing under `points/` or `screened/` is considered, in sorted order. If
    /// `only` is set, exactly those names are considered instead, and ones with no folders at all
    /// are skipped like any other incomplete point.
    pub fn scan(root: &Path, only: Option<&BTreeSet<String>>) -> Result<Self> {
        let points_root = root.join("points");
        let trips_root = root.join("screened");
        if !points_root.is_dir() && !trips_root.is_dir() {
            bail!(
                "{} has neither points/ nor screened/; is it a project folder?",
                root.display()
            );
        }

        let mut names = BTreeSet::new();
        for dir in [&points_root, &trips_root] {
            names.extend(subdirectories(dir)?);
        }
        if let Some(only) = only {
            for name in only {
                if !names.contains(name) {
                    warn!("{} isn't in {}", name, root.display());
                }
            }
            names = only.clone();
        }

        let mut targets = Vec::new();
        let mut skipped = Vec::new();
        for name in names {
            let point_dir = points_root.join(&name);
            let trip_dir = trips_root.join(&name);
            let mut reasons = Vec::new();

            let mut geometry_file = None;
            let mut image = None;
            if point_dir.is_dir() {
                geometry_file = list_csv_files(&point_dir)?.into_iter().next();
                if geometry_file.is_none() {
                    reasons.push(SkipReason::MissingGeometryFile);
                }
                image = find_image(&point_dir)?;
                if image.is_none() {
                    reasons.push(SkipReason::MissingImage);
                }
            } else {
                reasons.push(SkipReason::MissingGeometryFolder);
            }
            if !trip_dir.is_dir() {
                reasons.push(SkipReason::MissingTripFolder);
            }
            reasons.sort();

            match (geometry_file, image) {
                (Some(geometry_file), Some(image)) if reasons.is_empty() => {
                    targets.push(Target {
                        output_dir: root.join("analysis").join(&name),
                        name,
                        geometry_file,
                        image,
                        trip_dir,
                    });
                }
                _ => {
                    warn!(
                        "Skipping {}: {}",
                        name,
                        reasons
                            .iter()
                            .map(|r| r.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    skipped.push(Skipped { name, reasons });
                }
            }
        }
        Ok(Self { targets, skipped })
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in fs_err::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().to_string());
            }
        }
    }
    Ok(names)
}

fn find_image(dir: &Path) -> Result<Option<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs_err::read_dir(dir)? {
        let path = entry?.path();
        let is_jpeg = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);
        if path.is_file() && is_jpeg {
            images.push(path);
        }
    }
    images.sort();
    Ok(images.into_iter().next())
}
