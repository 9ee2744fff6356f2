use std::collections::{BTreeMap, BTreeSet};

use abstutil::Counter;
use anyhow::Result;
use geom::{Distance, Pt2D};

use crate::{resample, Config, DirectionLabel, Phase};

/// Cell coordinates, with (0, 0) at the southwest corner
pub type CellID = (usize, usize);

/// A square grid of cells centered on a point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshLayout {
    pub cell_size: Distance,
    pub half_size: Distance,
}

impl MeshLayout {
    pub fn new(config: &Config) -> Self {
        Self {
            cell_size: config.cell_size,
            half_size: config.mesh_half_size,
        }
    }

    /// Cells along each side
    pub fn grid_size(&self) -> usize {
        ((self.half_size * 2.0) / self.cell_size).floor() as usize
    }

    /// None outside the mesh
    pub fn cell(&self, pt: Pt2D) -> Option<CellID> {
        let half = self.half_size.inner_meters();
        let cell = self.cell_size.inner_meters();
        let ix = ((pt.x() + half) / cell).floor();
        let iy = ((pt.y() + half) / cell).floor();
        let n = self.grid_size() as f64;
        if ix < 0.0 || iy < 0.0 || ix >= n || iy >= n {
            return None;
        }
        Some((ix as usize, iy as usize))
    }

    /// Southwest corner of a cell, relative to the center
    pub fn cell_origin(&self, (ix, iy): CellID) -> Pt2D {
        let half = self.half_size.inner_meters();
        let cell = self.cell_size.inner_meters();
        Pt2D::new(ix as f64 * cell - half, iy as f64 * cell - half)
    }
}

/// Visit counts for one (direction, phase)
pub struct MeshGrid {
    pub counts: Counter<CellID>,
    /// How many sub-trajectories were added
    pub trajectories: usize,
}

impl MeshGrid {
    fn new() -> Self {
        Self {
            counts: Counter::new(),
            trajectories: 0,
        }
    }

    /// Percentage of trajectories visiting each cell, rounded half to even. Rows run north to
    /// south, so row 0 is the top of a map.
    pub fn percentages(&self, grid_size: usize) -> Vec<Vec<u32>> {
        let denominator = if self.trajectories > 0 {
            self.trajectories
        } else {
            self.counts.sum()
        };
        let mut rows = vec![vec![0; grid_size]; grid_size];
        if denominator == 0 {
            return rows;
        }
        for ((ix, iy), count) in self.counts.borrow() {
            if *ix >= grid_size || *iy >= grid_size {
                continue;
            }
            let pct = (*count as f64 * 100.0 / denominator as f64).round_ties_even();
            rows[grid_size - 1 - iy][*ix] = pct as u32;
        }
        rows
    }
}

/// Accumulates labeled sub-trajectories into one grid per (direction, phase). Each worker owns
/// one of these; merge them at the end.
pub struct MeshAggregator {
    layout: MeshLayout,
    step: Distance,
    grids: BTreeMap<(DirectionLabel, Phase), MeshGrid>,
}

impl MeshAggregator {
    pub fn new(config: &Config) -> Self {
        Self {
            layout: MeshLayout::new(config),
            step: config.sample_step,
            grids: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> MeshLayout {
        self.layout
    }

    /// Every distinct cell the trajectory passes through counts once. Returns the number of
    /// cells.
    pub fn add(&mut self, label: DirectionLabel, phase: Phase, pts: &[Pt2D]) -> usize {
        let visited = self.visited_cells(pts);
        let grid = self
            .grids
            .entry((label, phase))
            .or_insert_with(MeshGrid::new);
        grid.trajectories += 1;
        for cell in &visited {
            grid.counts.inc(*cell);
        }
        visited.len()
    }

    pub fn visited_cells(&self, pts: &[Pt2D]) -> BTreeSet<CellID> {
        resample(pts, self.step)
            .into_iter()
            .filter_map(|pt| self.layout.cell(pt))
            .collect()
    }

    /// Cell-wise sum
    pub fn merge(&mut self, other: MeshAggregator) -> Result<()> {
        if self.layout != other.layout || self.step != other.step {
            bail!("Can't merge meshes with different layouts");
        }
        for (key, grid) in other.grids {
            let ours = self.grids.entry(key).or_insert_with(MeshGrid::new);
            ours.trajectories += grid.trajectories;
            for (cell, count) in grid.counts.borrow() {
                ours.counts.add(*cell, *count);
            }
        }
        Ok(())
    }

    pub fn grids(&self) -> &BTreeMap<(DirectionLabel, Phase), MeshGrid> {
        &self.grids
    }

    pub fn get(&self, label: DirectionLabel, phase: Phase) -> Option<&MeshGrid> {
        self.grids.get(&(label, phase))
    }

    /// Sum of every cell across every grid
    pub fn total_count(&self) -> usize {
        self.grids.values().map(|g| g.counts.sum()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }
}

/// Rows of comma-separated integers
pub fn matrix_to_csv(rows: &[Vec<u32>]) -> Result<String> {
    let mut out = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut out);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    Ok(String::from_utf8(out)?)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use reference::BranchID;

    use super::*;

    fn config(cell: f64, half: f64, step: f64) -> Config {
        Config {
            cell_size: Distance::meters(cell),
            mesh_half_size: Distance::meters(half),
            sample_step: Distance::meters(step),
            ..Config::default()
        }
    }

    const B0: DirectionLabel = DirectionLabel::Branch(BranchID(0));

    #[test]
    fn cell_coordinates() {
        let layout = MeshLayout::new(&config(25.0, 1000.0, 10.0));
        assert_eq!(layout.grid_size(), 80);
        assert_eq!(layout.cell(Pt2D::new(0.0, 0.0)), Some((40, 40)));
        assert_eq!(layout.cell(Pt2D::new(-0.1, -0.1)), Some((39, 39)));
        assert_eq!(layout.cell(Pt2D::new(-1000.0, 999.9)), Some((0, 79)));
        assert_eq!(layout.cell(Pt2D::new(1000.0, 0.0)), None);
        assert_eq!(layout.cell(Pt2D::new(0.0, -1000.1)), None);
        assert_eq!(layout.cell_origin((40, 39)), Pt2D::new(0.0, -25.0));
    }

    #[test]
    fn five_cells_once_each() {
        let mut mesh = MeshAggregator::new(&config(10.0, 100.0, 10.0));
        let pts = vec![Pt2D::new(5.0, 5.0), Pt2D::new(45.0, 5.0)];
        assert_eq!(mesh.add(B0, Phase::Inflow, &pts), 5);

        let grid = mesh.get(B0, Phase::Inflow).unwrap();
        assert_eq!(grid.counts.borrow().len(), 5);
        assert!(grid.counts.borrow().values().all(|x| *x == 1));
        for ix in 10..15 {
            assert_eq!(grid.counts.get((ix, 10)), 1);
        }
    }

    #[test]
    fn revisiting_a_cell_counts_once() {
        let mut mesh = MeshAggregator::new(&config(10.0, 100.0, 10.0));
        // Out and back
        let pts = vec![
            Pt2D::new(5.0, 5.0),
            Pt2D::new(25.0, 5.0),
            Pt2D::new(5.0, 5.0),
        ];
        assert_eq!(mesh.add(B0, Phase::Outflow, &pts), 3);
        assert_eq!(mesh.total_count(), 3);
    }

    #[test]
    fn percentages_are_north_up() {
        let mut mesh = MeshAggregator::new(&config(10.0, 20.0, 10.0));
        // Northeast cell, twice
        mesh.add(B0, Phase::Inflow, &[Pt2D::new(12.0, 12.0), Pt2D::new(13.0, 13.0)]);
        mesh.add(B0, Phase::Inflow, &[Pt2D::new(12.0, 12.0), Pt2D::new(13.0, 13.0)]);
        // Southwest cell, once
        mesh.add(B0, Phase::Inflow, &[Pt2D::new(-18.0, -18.0), Pt2D::new(-17.0, -17.0)]);

        let rows = mesh.get(B0, Phase::Inflow).unwrap().percentages(4);
        assert_eq!(rows[0], vec![0, 0, 0, 67]);
        assert_eq!(rows[3], vec![33, 0, 0, 0]);
        // Normalizing is a pure function of the counts
        assert_eq!(rows, mesh.get(B0, Phase::Inflow).unwrap().percentages(4));
    }

    #[test]
    fn half_percent_rounds_to_even() {
        let mut grid = MeshGrid::new();
        grid.trajectories = 200;
        grid.counts.add((0, 0), 1);
        grid.counts.add((1, 0), 3);
        let rows = grid.percentages(2);
        // 0.5% rounds down, 1.5% rounds up
        assert_eq!(rows[1], vec![0, 2]);

        assert_eq!(MeshGrid::new().percentages(2), vec![vec![0, 0], vec![0, 0]]);
    }

    #[test]
    fn merge_matches_single_pass() {
        let cfg = config(10.0, 100.0, 5.0);
        let trips = vec![
            vec![Pt2D::new(-50.0, 0.0), Pt2D::new(50.0, 0.0)],
            vec![Pt2D::new(0.0, -50.0), Pt2D::new(0.0, 50.0)],
            vec![Pt2D::new(-30.0, -30.0), Pt2D::new(30.0, 30.0)],
        ];

        let mut all = MeshAggregator::new(&cfg);
        for pts in &trips {
            all.add(B0, Phase::Outflow, pts);
        }

        let mut first = MeshAggregator::new(&cfg);
        first.add(B0, Phase::Outflow, &trips[0]);
        let mut second = MeshAggregator::new(&cfg);
        for pts in &trips[1..] {
            second.add(B0, Phase::Outflow, pts);
        }
        first.merge(second).unwrap();

        let a = all.get(B0, Phase::Outflow).unwrap();
        let b = first.get(B0, Phase::Outflow).unwrap();
        assert_eq!(a.trajectories, b.trajectories);
        assert_eq!(a.counts.borrow(), b.counts.borrow());

        assert!(first.merge(MeshAggregator::new(&config(20.0, 100.0, 5.0))).is_err());
    }

    #[test]
    fn csv_matrix() {
        assert_eq!(
            matrix_to_csv(&[vec![0, 1], vec![100, 0]]).unwrap(),
            "0,1\n100,0\n"
        );
    }

    proptest! {
        #[test]
        fn counts_are_conserved(
            trips in proptest::collection::vec(
                proptest::collection::vec((-150.0..150.0f64, -150.0..150.0f64), 0..8),
                1..10,
            ),
            outflow in any::<bool>(),
        ) {
            let mut mesh = MeshAggregator::new(&config(25.0, 100.0, 10.0));
            let phase = if outflow { Phase::Outflow } else { Phase::Inflow };
            let mut expected = 0;
            for (idx, trip) in trips.iter().enumerate() {
                let pts: Vec<Pt2D> = trip.iter().map(|(x, y)| Pt2D::new(*x, *y)).collect();
                let label = if idx % 2 == 0 { B0 } else { DirectionLabel::Unknown };
                expected += mesh.visited_cells(&pts).len();
                mesh.add(label, phase, &pts);
            }
            prop_assert_eq!(mesh.total_count(), expected);
        }
    }
}
