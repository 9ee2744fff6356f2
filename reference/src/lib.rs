//! Reference geometries that trips get matched against, plus the small amount of geodesy shared
//! by everything else.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod bearing;
mod frame;
mod point;
mod route;
mod weekdays;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use abstutil::Timer;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use bearing::{bearing, circular_difference, normalize_degrees, reverse_bearing};
pub use frame::{project_onto_segment, LocalFrame, Position, Projection, EARTH_RADIUS_METERS};
pub use point::{BearingConvention, Branch, BranchID, NamedPoint};
pub use route::{CoordinateColumns, RoutePolyline};
pub use weekdays::{DaysOfWeek, WEEKDAYS};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ReferenceGeometry {
    Route(RoutePolyline),
    Point(NamedPoint),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryKind {
    Route,
    Point,
}

impl ReferenceGeometry {
    pub fn name(&self) -> &str {
        match self {
            ReferenceGeometry::Route(route) => &route.name,
            ReferenceGeometry::Point(point) => &point.name,
        }
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            ReferenceGeometry::Route(_) => GeometryKind::Route,
            ReferenceGeometry::Point(_) => GeometryKind::Point,
        }
    }

    /// Every position a fix may be close to: all vertices of a route, or a point's center.
    pub fn reference_points(&self) -> &[Position] {
        match self {
            ReferenceGeometry::Route(route) => &route.vertices,
            ReferenceGeometry::Point(point) => std::slice::from_ref(&point.center),
        }
    }
}

/// Why a reference geometry can't be used. Matching against it would be meaningless, so callers
/// give up on that geometry entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    TooFewVertices { name: String, found: usize },
    MissingCenter { name: String },
    TooFewBranches { name: String, found: usize },
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GeometryError::TooFewVertices { name, found } => {
                write!(f, "route {name} has {found} vertices, but needs at least 2")
            }
            GeometryError::MissingCenter { name } => {
                write!(f, "point {name} has no valid center row")
            }
            GeometryError::TooFewBranches { name, found } => {
                write!(f, "point {name} has {found} branches, but needs at least 2")
            }
        }
    }
}

impl std::error::Error for GeometryError {}

/// Immutable after loading. Share by reference across threads.
#[derive(Default)]
pub struct GeometryStore {
    geometries: BTreeMap<String, ReferenceGeometry>,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, geometry: ReferenceGeometry) -> Result<()> {
        let name = geometry.name().to_string();
        if self.geometries.contains_key(&name) {
            bail!("Duplicate reference geometry {name}");
        }
        self.geometries.insert(name, geometry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ReferenceGeometry> {
        self.geometries.get(name)
    }

    pub fn point(&self, name: &str) -> Option<&NamedPoint> {
        match self.get(name)? {
            ReferenceGeometry::Point(point) => Some(point),
            ReferenceGeometry::Route(_) => None,
        }
    }

    pub fn route(&self, name: &str) -> Option<&RoutePolyline> {
        match self.get(name)? {
            ReferenceGeometry::Route(route) => Some(route),
            ReferenceGeometry::Point(_) => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.geometries.keys().map(|x| x.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceGeometry> {
        self.geometries.values()
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    /// Loads every `.csv` file in a directory as one geometry, named after the file. Geometries
    /// that fail to load don't stop the others; they're returned alongside the store.
    pub fn load_dir(
        dir: &Path,
        loader: &GeometryLoader,
        timer: &mut Timer,
    ) -> Result<(Self, Vec<(String, anyhow::Error)>)> {
        let paths = list_csv_files(dir)?;
        let mut store = Self::new();
        let mut failures = Vec::new();

        timer.start_iter("load reference geometries", paths.len());
        for path in paths {
            timer.next();
            let name = geometry_name(&path);
            match loader
                .load_file(&path)
                .and_then(|geometry| store.insert(geometry))
            {
                Ok(()) => {}
                Err(err) => {
                    warn!("Couldn't load {}: {}", path.display(), err);
                    failures.push((name, err));
                }
            }
        }
        Ok((store, failures))
    }
}

/// Everything needed to interpret a geometry file.
#[derive(Clone, Copy, Debug)]
pub struct GeometryLoader {
    pub kind: GeometryKind,
    pub convention: BearingConvention,
    pub wide_columns: CoordinateColumns,
}

impl GeometryLoader {
    pub fn load<R: std::io::Read>(&self, name: &str, reader: R) -> Result<ReferenceGeometry> {
        Ok(match self.kind {
            GeometryKind::Route => {
                ReferenceGeometry::Route(route::load(name, reader, self.wide_columns)?)
            }
            GeometryKind::Point => {
                ReferenceGeometry::Point(point::load(name, reader, self.convention)?)
            }
        })
    }

    /// The geometry is named after the file stem.
    pub fn load_file(&self, path: &Path) -> Result<ReferenceGeometry> {
        let file = fs_err::File::open(path)?;
        self.load(&geometry_name(path), file)
    }
}

pub fn geometry_name(path: &Path) -> String {
    path.file_stem()
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Sorted, so runs are reproducible
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs_err::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if path.is_file() && is_csv {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
