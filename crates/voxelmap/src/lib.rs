//! Rolling voxel map for LiDAR keypoint clouds.
//!
//! Provides:
//! - `VoxelFilter`, a leaf-size downsampling filter
//! - `RollingGrid`, a bounded 3-D voxel grid of point clouds that scrolls
//!   with the sensor and answers radius queries
//!
//! The grid covers a fixed spatial window centered on a moving anchor.
//! When the anchor approaches a boundary the grid rolls: cells falling out
//! of range are discarded and new empty cells appear at the leading edge.

use nalgebra::Point3;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum VoxelMapError {
    #[error("Invalid leaf size: {0}")]
    InvalidLeafSize(f64),
    #[error("Invalid voxel size: {0}")]
    InvalidVoxelSize(f64),
    #[error("Invalid grid dimensions: ({0}, {1}, {2})")]
    InvalidDims(usize, usize, usize),
    #[error("Invalid query radius: {0}")]
    InvalidRadius(f64),
}

/// Leaf-size voxel downsampling filter.
///
/// Keeps one representative point per leaf cell: the point closest to the
/// cell's centroid. Leaf cells are aligned to the world origin, so
/// re-filtering an already filtered cloud is stable.
#[derive(Debug, Clone)]
pub struct VoxelFilter {
    leaf_size: f64,
}

impl VoxelFilter {
    pub fn new(leaf_size: f64) -> Result<Self, VoxelMapError> {
        if !(leaf_size > 0.0) || !leaf_size.is_finite() {
            return Err(VoxelMapError::InvalidLeafSize(leaf_size));
        }
        Ok(Self { leaf_size })
    }

    pub fn leaf_size(&self) -> f64 {
        self.leaf_size
    }

    fn leaf_of(&self, p: &Point3<f64>) -> (i64, i64, i64) {
        (
            (p.x / self.leaf_size).floor() as i64,
            (p.y / self.leaf_size).floor() as i64,
            (p.z / self.leaf_size).floor() as i64,
        )
    }

    /// Downsample a cloud to at most one point per leaf cell.
    pub fn filter(&self, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        if points.is_empty() {
            return Vec::new();
        }

        // First pass: per-leaf centroid.
        let mut sums: HashMap<(i64, i64, i64), (Point3<f64>, usize)> = HashMap::new();
        for p in points {
            let entry = sums
                .entry(self.leaf_of(p))
                .or_insert((Point3::origin(), 0));
            entry.0.coords += p.coords;
            entry.1 += 1;
        }

        // Second pass: keep the point nearest its leaf centroid.
        let mut best: HashMap<(i64, i64, i64), (f64, Point3<f64>)> = HashMap::new();
        for p in points {
            let key = self.leaf_of(p);
            let (sum, count) = &sums[&key];
            let centroid = sum.coords / *count as f64;
            let dist = (p.coords - centroid).norm_squared();
            match best.get_mut(&key) {
                Some(slot) if slot.0 <= dist => {}
                Some(slot) => *slot = (dist, *p),
                None => {
                    best.insert(key, (dist, *p));
                }
            }
        }

        best.into_values().map(|(_, p)| p).collect()
    }
}

/// Bounded 3-D voxel grid of downsampled point clouds.
#[derive(Debug, Clone)]
pub struct RollingGrid {
    /// Flat cell storage, x-major within y within z
    cells: Vec<Vec<Point3<f64>>>,
    /// Grid dimensions in cells
    dims: (usize, usize, usize),
    /// Cell edge length in meters
    voxel_size: f64,
    /// Leaf filter applied per cell after every insert
    filter: VoxelFilter,
    /// World-integer cell coordinates of grid cell (0, 0, 0)
    origin: (i64, i64, i64),
}

impl RollingGrid {
    /// Create a grid centered on the world origin.
    pub fn new(
        voxel_size: f64,
        dims: (usize, usize, usize),
        leaf_size: f64,
    ) -> Result<Self, VoxelMapError> {
        if !(voxel_size > 0.0) || !voxel_size.is_finite() {
            return Err(VoxelMapError::InvalidVoxelSize(voxel_size));
        }
        if dims.0 == 0 || dims.1 == 0 || dims.2 == 0 {
            return Err(VoxelMapError::InvalidDims(dims.0, dims.1, dims.2));
        }
        let filter = VoxelFilter::new(leaf_size)?;
        Ok(Self {
            cells: vec![Vec::new(); dims.0 * dims.1 * dims.2],
            dims,
            voxel_size,
            filter,
            origin: (
                -(dims.0 as i64) / 2,
                -(dims.1 as i64) / 2,
                -(dims.2 as i64) / 2,
            ),
        })
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    pub fn leaf_size(&self) -> f64 {
        self.filter.leaf_size()
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    /// Total number of stored points.
    pub fn num_points(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }

    /// Change the leaf size and re-filter every populated cell.
    pub fn set_leaf_size(&mut self, leaf_size: f64) -> Result<(), VoxelMapError> {
        let filter = VoxelFilter::new(leaf_size)?;
        for cell in self.cells.iter_mut().filter(|c| !c.is_empty()) {
            *cell = filter.filter(cell);
        }
        self.filter = filter;
        Ok(())
    }

    /// Change the voxel size. Clears all cells.
    pub fn set_voxel_size(&mut self, voxel_size: f64) -> Result<(), VoxelMapError> {
        if !(voxel_size > 0.0) || !voxel_size.is_finite() {
            return Err(VoxelMapError::InvalidVoxelSize(voxel_size));
        }
        self.voxel_size = voxel_size;
        // Cell coordinates change meaning with the cell size; start over
        // centered on the world origin.
        self.origin = (
            -(self.dims.0 as i64) / 2,
            -(self.dims.1 as i64) / 2,
            -(self.dims.2 as i64) / 2,
        );
        self.clear();
        Ok(())
    }

    /// Change the grid dimensions, keeping the current center. Clears all cells.
    pub fn set_dims(&mut self, dims: (usize, usize, usize)) -> Result<(), VoxelMapError> {
        if dims.0 == 0 || dims.1 == 0 || dims.2 == 0 {
            return Err(VoxelMapError::InvalidDims(dims.0, dims.1, dims.2));
        }
        let center = (
            self.origin.0 + self.dims.0 as i64 / 2,
            self.origin.1 + self.dims.1 as i64 / 2,
            self.origin.2 + self.dims.2 as i64 / 2,
        );
        self.dims = dims;
        self.origin = (
            center.0 - dims.0 as i64 / 2,
            center.1 - dims.1 as i64 / 2,
            center.2 - dims.2 as i64 / 2,
        );
        self.cells = vec![Vec::new(); dims.0 * dims.1 * dims.2];
        Ok(())
    }

    /// Drop every stored point.
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    fn world_cell(&self, p: &Point3<f64>) -> (i64, i64, i64) {
        (
            (p.x / self.voxel_size).floor() as i64,
            (p.y / self.voxel_size).floor() as i64,
            (p.z / self.voxel_size).floor() as i64,
        )
    }

    fn index_of(&self, cell: (i64, i64, i64)) -> Option<usize> {
        let lx = cell.0 - self.origin.0;
        let ly = cell.1 - self.origin.1;
        let lz = cell.2 - self.origin.2;
        if lx < 0
            || ly < 0
            || lz < 0
            || lx >= self.dims.0 as i64
            || ly >= self.dims.1 as i64
            || lz >= self.dims.2 as i64
        {
            return None;
        }
        Some(
            (lz as usize * self.dims.1 + ly as usize) * self.dims.0 + lx as usize,
        )
    }

    /// Insert points, then re-apply the leaf filter on each touched cell so
    /// cells stay subsampled. Points outside the grid window are dropped.
    pub fn insert(&mut self, points: &[Point3<f64>]) {
        let mut touched: Vec<usize> = Vec::new();
        let mut dropped = 0usize;

        for p in points {
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                dropped += 1;
                continue;
            }
            match self.index_of(self.world_cell(p)) {
                Some(idx) => {
                    self.cells[idx].push(*p);
                    touched.push(idx);
                }
                None => dropped += 1,
            }
        }

        touched.sort_unstable();
        touched.dedup();
        for idx in touched {
            self.cells[idx] = self.filter.filter(&self.cells[idx]);
        }

        if dropped > 0 {
            debug!(dropped, "points outside grid window");
        }
    }

    /// Return all stored points within `radius` of `center`.
    ///
    /// The candidate cell range covers the whole sphere, so results are
    /// correct across cell boundaries.
    pub fn query_radius(
        &self,
        center: &Point3<f64>,
        radius: f64,
    ) -> Result<Vec<Point3<f64>>, VoxelMapError> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(VoxelMapError::InvalidRadius(radius));
        }

        let r2 = radius * radius;
        let lo = self.world_cell(&Point3::new(
            center.x - radius,
            center.y - radius,
            center.z - radius,
        ));
        let hi = self.world_cell(&Point3::new(
            center.x + radius,
            center.y + radius,
            center.z + radius,
        ));

        let mut out = Vec::new();
        for cz in lo.2..=hi.2 {
            for cy in lo.1..=hi.1 {
                for cx in lo.0..=hi.0 {
                    if let Some(idx) = self.index_of((cx, cy, cz)) {
                        for p in &self.cells[idx] {
                            if (p.coords - center.coords).norm_squared() <= r2 {
                                out.push(*p);
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Shift the grid so `anchor` lies near its center. Cells shifted out of
    /// range are discarded; new cells start empty. Recentering on an anchor
    /// already at the center is a no-op.
    pub fn recenter(&mut self, anchor: &Point3<f64>) {
        let cell = self.world_cell(anchor);
        let new_origin = (
            cell.0 - self.dims.0 as i64 / 2,
            cell.1 - self.dims.1 as i64 / 2,
            cell.2 - self.dims.2 as i64 / 2,
        );
        if new_origin == self.origin {
            return;
        }

        let mut new_cells = vec![Vec::new(); self.dims.0 * self.dims.1 * self.dims.2];
        let mut kept = 0usize;
        let mut dropped = 0usize;

        for lz in 0..self.dims.2 {
            for ly in 0..self.dims.1 {
                for lx in 0..self.dims.0 {
                    let old_idx =
                        (lz * self.dims.1 + ly) * self.dims.0 + lx;
                    if self.cells[old_idx].is_empty() {
                        continue;
                    }
                    let world = (
                        self.origin.0 + lx as i64,
                        self.origin.1 + ly as i64,
                        self.origin.2 + lz as i64,
                    );
                    let nx = world.0 - new_origin.0;
                    let ny = world.1 - new_origin.1;
                    let nz = world.2 - new_origin.2;
                    if nx >= 0
                        && ny >= 0
                        && nz >= 0
                        && nx < self.dims.0 as i64
                        && ny < self.dims.1 as i64
                        && nz < self.dims.2 as i64
                    {
                        let new_idx = (nz as usize * self.dims.1 + ny as usize)
                            * self.dims.0
                            + nx as usize;
                        kept += self.cells[old_idx].len();
                        new_cells[new_idx] = std::mem::take(&mut self.cells[old_idx]);
                    } else {
                        dropped += self.cells[old_idx].len();
                    }
                }
            }
        }

        self.origin = new_origin;
        self.cells = new_cells;
        debug!(kept, dropped, "rolled grid to new anchor");
    }

    /// All stored points, cell order unspecified.
    pub fn all_points(&self) -> Vec<Point3<f64>> {
        self.cells.iter().flatten().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(n: usize, extent: f64, seed: u64) -> Vec<Point3<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                )
            })
            .collect()
    }

    #[test]
    fn test_filter_keeps_one_per_leaf() {
        let filter = VoxelFilter::new(1.0).unwrap();
        let points = vec![
            Point3::new(0.1, 0.1, 0.1),
            Point3::new(0.2, 0.2, 0.2),
            Point3::new(0.3, 0.3, 0.3),
            Point3::new(1.5, 0.1, 0.1),
        ];
        let filtered = filter.filter(&points);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_filter_rejects_bad_leaf() {
        assert!(VoxelFilter::new(0.0).is_err());
        assert!(VoxelFilter::new(-1.0).is_err());
        assert!(VoxelFilter::new(f64::NAN).is_err());
    }

    #[test]
    fn test_grid_rejects_zero_dims() {
        assert!(RollingGrid::new(1.0, (0, 4, 4), 0.2).is_err());
        assert!(RollingGrid::new(1.0, (4, 4, 4), 0.2).is_ok());
    }

    #[test]
    fn test_query_rejects_negative_radius() {
        let grid = RollingGrid::new(1.0, (4, 4, 4), 0.2).unwrap();
        assert!(grid.query_radius(&Point3::origin(), -1.0).is_err());
        assert!(grid.query_radius(&Point3::origin(), f64::NAN).is_err());
    }

    #[test]
    fn test_query_matches_brute_force() {
        let mut grid = RollingGrid::new(2.0, (11, 11, 11), 0.3).unwrap();
        let points = random_points(2000, 10.0, 7);
        grid.insert(&points);

        let stored = grid.all_points();
        let center = Point3::new(1.3, -0.7, 2.1);
        let radius = 3.5;

        let mut expected: Vec<_> = stored
            .iter()
            .filter(|p| (p.coords - center.coords).norm_squared() <= radius * radius)
            .copied()
            .collect();
        let mut got = grid.query_radius(&center, radius).unwrap();

        let key = |p: &Point3<f64>| (p.x.to_bits(), p.y.to_bits(), p.z.to_bits());
        expected.sort_by_key(key);
        got.sort_by_key(key);
        assert_eq!(expected.len(), got.len());
        for (a, b) in expected.iter().zip(got.iter()) {
            assert_eq!(key(a), key(b));
        }
    }

    #[test]
    fn test_query_crosses_cell_boundaries() {
        let mut grid = RollingGrid::new(1.0, (9, 9, 9), 0.1).unwrap();
        // Two points in adjacent cells, both within radius of a boundary point.
        grid.insert(&[Point3::new(0.95, 0.0, 0.0), Point3::new(1.05, 0.0, 0.0)]);
        let found = grid
            .query_radius(&Point3::new(1.0, 0.0, 0.0), 0.2)
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_insert_respects_leaf_bound() {
        let voxel = 2.0;
        let leaf = 0.5;
        let mut grid = RollingGrid::new(voxel, (5, 5, 5), leaf).unwrap();
        // Dense cluster inside one voxel cell.
        let points = random_points(5000, 0.99, 3);
        grid.insert(&points);

        // A voxel spans at most ceil(V/L)+1 leaf cells per axis.
        let per_axis = (voxel / leaf).ceil() as usize + 1;
        let bound = per_axis.pow(3);
        for cell in &grid.cells {
            assert!(cell.len() <= bound, "cell holds {} > bound {}", cell.len(), bound);
        }
    }

    #[test]
    fn test_recenter_idempotent() {
        let mut grid = RollingGrid::new(1.0, (7, 7, 7), 0.2).unwrap();
        grid.insert(&random_points(500, 3.0, 11));

        let anchor = Point3::new(1.7, -0.4, 0.9);
        grid.recenter(&anchor);
        let after_first = grid.all_points();
        grid.recenter(&anchor);
        let after_second = grid.all_points();

        assert_eq!(after_first.len(), after_second.len());
    }

    #[test]
    fn test_recenter_drops_out_of_range() {
        let mut grid = RollingGrid::new(1.0, (5, 5, 5), 0.2).unwrap();
        grid.insert(&[Point3::new(0.0, 0.0, 0.0)]);
        assert_eq!(grid.num_points(), 1);

        // Move the window far away; the old point must fall out.
        grid.recenter(&Point3::new(100.0, 0.0, 0.0));
        assert_eq!(grid.num_points(), 0);

        // And the window now accepts points near the new anchor.
        grid.insert(&[Point3::new(100.2, 0.0, 0.0)]);
        assert_eq!(grid.num_points(), 1);
    }

    #[test]
    fn test_set_dims_clears(){
        let mut grid = RollingGrid::new(1.0, (5, 5, 5), 0.2).unwrap();
        grid.insert(&[Point3::new(0.1, 0.1, 0.1)]);
        grid.set_dims((7, 7, 7)).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.dims(), (7, 7, 7));
    }

    #[test]
    fn test_set_leaf_size_refilters() {
        let mut grid = RollingGrid::new(4.0, (3, 3, 3), 0.1).unwrap();
        grid.insert(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.5, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ]);
        assert_eq!(grid.num_points(), 3);
        grid.set_leaf_size(2.0).unwrap();
        assert!(grid.num_points() < 3);
    }
}
