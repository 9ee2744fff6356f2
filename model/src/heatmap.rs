use geom::Pt2D;
use serde::Serialize;

use reference::LocalFrame;

use crate::{Config, MeshLayout};

/// Blue through dark red
pub const PALETTE: [&str; 10] = [
    "#2c7bb6", "#00a6ca", "#00ccbc", "#90eb9d", "#ffff8c", "#f9d057", "#f29e2e", "#e76818",
    "#d7191c", "#8c0d0d",
];

/// How to draw percentage grids. A high percentile of the nonzero cells saturates the scale, so
/// one busy cell doesn't wash out everything else.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeatmapScale {
    /// Values at or above this get the last color. 0 if every cell is empty.
    pub vmax: u32,
    pub percentile: f64,
    pub gamma: f64,
    pub min_opacity: f64,
    pub max_opacity: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellStyle {
    pub step: usize,
    pub color: &'static str,
    pub opacity: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LegendStep {
    pub color: &'static str,
    pub opacity: f64,
    /// The range of values drawn this way
    pub from: f64,
    pub to: f64,
}

impl HeatmapScale {
    pub fn new<I: IntoIterator<Item = u32>>(values: I, config: &Config) -> Self {
        let mut nonzero: Vec<f64> = values
            .into_iter()
            .filter(|x| *x > 0)
            .map(|x| x as f64)
            .collect();
        let vmax = match percentile(&mut nonzero, config.percentile) {
            Some(x) => (x as u32).max(1),
            None => 0,
        };
        Self {
            vmax,
            percentile: config.percentile,
            gamma: config.gamma,
            min_opacity: config.min_opacity,
            max_opacity: config.max_opacity,
        }
    }

    /// None for empty cells
    pub fn style(&self, value: u32) -> Option<CellStyle> {
        if value == 0 || self.vmax == 0 {
            return None;
        }
        let t = (value as f64 / self.vmax as f64).min(1.0).powf(self.gamma);
        let n = PALETTE.len();
        let step = ((t * n as f64).floor() as usize).min(n - 1);
        Some(CellStyle {
            step,
            color: PALETTE[step],
            opacity: self.opacity(step),
        })
    }

    fn opacity(&self, step: usize) -> f64 {
        let n = PALETTE.len();
        self.min_opacity + (step as f64) / ((n - 1) as f64) * (self.max_opacity - self.min_opacity)
    }

    /// Value ranges for each color, inverting the gamma curve
    pub fn legend(&self) -> Vec<LegendStep> {
        let n = PALETTE.len();
        let vmax = self.vmax.max(1) as f64;
        (0..n)
            .map(|step| {
                let edge = |i: usize| (i as f64 / n as f64).powf(1.0 / self.gamma) * vmax;
                LegendStep {
                    color: PALETTE[step],
                    opacity: self.opacity(step),
                    from: edge(step),
                    to: edge(step + 1),
                }
            })
            .collect()
    }
}

/// Linear interpolation between the closest ranks. Sorts the input.
/// None if empty.
pub fn percentile(values: &mut [f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(values[lo] + (values[hi] - values[lo]) * (rank - lo as f64))
}

/// Every nonzero cell of a north-up percentage grid as a styled square polygon.
pub fn grid_to_geojson(
    rows: &[Vec<u32>],
    layout: &MeshLayout,
    frame: &LocalFrame,
    scale: &HeatmapScale,
    properties: &[(&str, String)],
) -> geojson::FeatureCollection {
    use geojson::{Feature, FeatureCollection};

    let grid_size = rows.len();
    let cell = layout.cell_size.inner_meters();
    let mut features = Vec::new();
    for (row_idx, row) in rows.iter().enumerate() {
        for (ix, value) in row.iter().enumerate() {
            let style = if let Some(x) = scale.style(*value) {
                x
            } else {
                continue;
            };
            let iy = grid_size - 1 - row_idx;
            let sw = layout.cell_origin((ix, iy));
            let ring: Vec<Vec<f64>> = [
                sw,
                Pt2D::new(sw.x() + cell, sw.y()),
                Pt2D::new(sw.x() + cell, sw.y() + cell),
                Pt2D::new(sw.x(), sw.y() + cell),
                sw,
            ]
            .into_iter()
            .map(|pt| {
                let pos = frame.to_position(pt);
                vec![pos.lon, pos.lat]
            })
            .collect();

            let mut feature = Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::Polygon(vec![ring]))),
                id: None,
                properties: None,
                foreign_members: None,
            };
            feature.set_property("value", *value);
            feature.set_property("ix", ix);
            feature.set_property("iy", iy);
            feature.set_property("color", style.color);
            feature.set_property("opacity", style.opacity);
            for (key, value) in properties {
                feature.set_property(*key, value.clone());
            }
            features.push(feature);
        }
    }
    FeatureCollection {
        features,
        bbox: None,
        foreign_members: None,
    }
}
