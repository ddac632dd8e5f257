//! Keypoint-to-geometry correspondence search for the ICP loops.
//!
//! Each keypoint is matched against either the previous sweep's keypoints
//! (kd-tree) or the rolling map (radius queries). Accepted matches become
//! weighted point-to-line / point-to-plane residual terms; rejected ones are
//! tallied per cause in a histogram.
//!
//! Match discovery is parallel across keypoints: every rayon worker folds
//! into its own `MatchBatch`, and batches are merged afterwards, so there is
//! no shared mutable residual list.

use crate::config::MatchingConfig;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use types::Point;
use voxelmap::RollingGrid;

/// Which estimation stage a matcher is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStep {
    EgoMotion,
    Mapping,
}

/// Why a keypoint failed to produce a residual term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionCause {
    /// Too few usable neighbors (or all from a single scan line)
    NotEnoughNeighbors,
    /// The neighborhood lies too far from the query point
    NeighborsTooFar,
    /// The neighborhood eigen structure is neither line- nor plane-like
    /// enough, or its points stray from the fitted geometry
    BadEigenRatio,
    /// The term's error stayed large after the optimization converged
    ResidualTooLarge,
    /// Non-finite values or a degenerate covariance
    NanOrSingular,
    /// The estimated transform tripped the divergence guard
    TransformDiverged,
    Other,
}

impl RejectionCause {
    pub const COUNT: usize = 7;

    fn index(self) -> usize {
        match self {
            RejectionCause::NotEnoughNeighbors => 0,
            RejectionCause::NeighborsTooFar => 1,
            RejectionCause::BadEigenRatio => 2,
            RejectionCause::ResidualTooLarge => 3,
            RejectionCause::NanOrSingular => 4,
            RejectionCause::TransformDiverged => 5,
            RejectionCause::Other => 6,
        }
    }

    pub const ALL: [RejectionCause; RejectionCause::COUNT] = [
        RejectionCause::NotEnoughNeighbors,
        RejectionCause::NeighborsTooFar,
        RejectionCause::BadEigenRatio,
        RejectionCause::ResidualTooLarge,
        RejectionCause::NanOrSingular,
        RejectionCause::TransformDiverged,
        RejectionCause::Other,
    ];
}

/// Per-cause rejection counts, persisted across sweeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectionHistogram {
    counts: [u64; RejectionCause::COUNT],
}

impl RejectionHistogram {
    pub fn record(&mut self, cause: RejectionCause) {
        self.counts[cause.index()] += 1;
    }

    pub fn count(&self, cause: RejectionCause) -> u64 {
        self.counts[cause.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn merge(&mut self, other: &RejectionHistogram) {
        for (a, b) in self.counts.iter_mut().zip(other.counts.iter()) {
            *a += b;
        }
    }
}

/// One accumulated ICP residual term.
///
/// The solver minimizes `w * (R*x + t - p)^T A (R*x + t - p)` over all terms.
#[derive(Debug, Clone)]
pub struct Residual {
    /// SPD weighting of the point-to-geometry error
    pub a: Matrix3<f64>,
    /// Matched point on the geometry, in the target frame
    pub p: Vector3<f64>,
    /// Keypoint in sensor frame (undistorted to sweep end)
    pub x: Vector3<f64>,
    /// Robust outlier-attenuation weight in [0, 1]
    pub weight: f64,
    /// Sweep-relative time of the keypoint
    pub time: f64,
}

/// A keypoint prepared for matching.
#[derive(Debug, Clone, Copy)]
pub struct QueryPoint {
    /// Sensor-frame position, undistorted to sweep end
    pub x: Vector3<f64>,
    /// Position transformed by the current estimate (target frame)
    pub q: Vector3<f64>,
    /// Sweep-relative acquisition time
    pub time: f64,
}

/// Thread-local accumulation of residuals and rejections.
#[derive(Debug, Default)]
pub struct MatchBatch {
    pub residuals: Vec<Residual>,
    pub rejections: RejectionHistogram,
}

impl MatchBatch {
    pub fn merge_in(&mut self, other: MatchBatch) {
        self.residuals.extend(other.residuals);
        self.rejections.merge(&other.rejections);
    }

    fn merged(mut self, other: MatchBatch) -> MatchBatch {
        self.merge_in(other);
        self
    }
}

/// Kd-tree over a keypoint cloud, keeping scan-line ids alongside.
pub struct ScanKdTree {
    tree: KdTree<f64, 3>,
    positions: Vec<Vector3<f64>>,
    lasers: Vec<usize>,
}

impl ScanKdTree {
    pub fn build(points: &[Point]) -> Self {
        let mut tree: KdTree<f64, 3> = KdTree::new();
        let mut positions = Vec::with_capacity(points.len());
        let mut lasers = Vec::with_capacity(points.len());
        for (i, p) in points.iter().enumerate() {
            tree.add(&[p.x, p.y, p.z], i as u64);
            positions.push(Vector3::new(p.x, p.y, p.z));
            lasers.push(p.laser_id);
        }
        Self {
            tree,
            positions,
            lasers,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Indices and euclidean distances of the k nearest stored points,
    /// closest first.
    fn nearest(&self, q: &Vector3<f64>, k: usize) -> Vec<(usize, f64)> {
        self.tree
            .nearest_n::<SquaredEuclidean>(&[q.x, q.y, q.z], k)
            .into_iter()
            .map(|n| (n.item as usize, n.distance.sqrt()))
            .collect()
    }
}

/// Matches keypoints to local line/plane geometry for one ICP stage.
pub struct Matcher<'a> {
    params: &'a MatchingConfig,
    max_icp_distance: f64,
}

impl<'a> Matcher<'a> {
    pub fn new(params: &'a MatchingConfig, max_icp_distance: f64) -> Self {
        Self {
            params,
            max_icp_distance,
        }
    }

    /// Match edge keypoints against the previous sweep's edges.
    ///
    /// Neighbors must come from at least two distinct scan lines, so a
    /// single beam cannot fake an elongated neighborhood.
    pub fn match_edges_scan(&self, queries: &[QueryPoint], tree: &ScanKdTree) -> MatchBatch {
        queries
            .par_iter()
            .fold(MatchBatch::default, |mut batch, qp| {
                match self.try_edge_scan(qp, tree) {
                    Ok(res) => batch.residuals.push(res),
                    Err(cause) => batch.rejections.record(cause),
                }
                batch
            })
            .reduce(MatchBatch::default, MatchBatch::merged)
    }

    /// Match planar keypoints against the previous sweep's planars.
    pub fn match_planes_scan(&self, queries: &[QueryPoint], tree: &ScanKdTree) -> MatchBatch {
        queries
            .par_iter()
            .fold(MatchBatch::default, |mut batch, qp| {
                match self.try_plane_scan(qp, tree) {
                    Ok(res) => batch.residuals.push(res),
                    Err(cause) => batch.rejections.record(cause),
                }
                batch
            })
            .reduce(MatchBatch::default, MatchBatch::merged)
    }

    /// Match edge keypoints against the rolling map, refining the inlier set
    /// with a sample-consensus pass.
    pub fn match_edges_map(&self, queries: &[QueryPoint], grid: &RollingGrid) -> MatchBatch {
        queries
            .par_iter()
            .fold(MatchBatch::default, |mut batch, qp| {
                match self.try_edge_map(qp, grid) {
                    Ok(res) => batch.residuals.push(res),
                    Err(cause) => batch.rejections.record(cause),
                }
                batch
            })
            .reduce(MatchBatch::default, MatchBatch::merged)
    }

    /// Match planar keypoints against the rolling map.
    pub fn match_planes_map(&self, queries: &[QueryPoint], grid: &RollingGrid) -> MatchBatch {
        queries
            .par_iter()
            .fold(MatchBatch::default, |mut batch, qp| {
                match self.try_plane_map(qp, grid) {
                    Ok(res) => batch.residuals.push(res),
                    Err(cause) => batch.rejections.record(cause),
                }
                batch
            })
            .reduce(MatchBatch::default, MatchBatch::merged)
    }

    fn try_edge_scan(
        &self,
        qp: &QueryPoint,
        tree: &ScanKdTree,
    ) -> Result<Residual, RejectionCause> {
        let pool = tree.nearest(&qp.q, 2 * self.params.line_neighbors);
        if pool.len() < self.params.line_min_neighbors {
            return Err(RejectionCause::NotEnoughNeighbors);
        }
        if pool[0].1 > self.max_icp_distance {
            return Err(RejectionCause::NeighborsTooFar);
        }

        let k = self.params.line_neighbors.min(pool.len());
        let mut selected: Vec<usize> = pool[..k].iter().map(|&(i, _)| i).collect();

        // Degenerate colinear matches from a single beam are useless: swap
        // the farthest pick for the nearest point of another scan line.
        let first_laser = tree.lasers[selected[0]];
        if selected.iter().all(|&i| tree.lasers[i] == first_laser) {
            match pool[k..]
                .iter()
                .find(|&&(i, _)| tree.lasers[i] != first_laser)
            {
                Some(&(alt, _)) => {
                    selected.pop();
                    selected.push(alt);
                }
                None => return Err(RejectionCause::NotEnoughNeighbors),
            }
        }

        if selected.len() < self.params.line_min_neighbors {
            return Err(RejectionCause::NotEnoughNeighbors);
        }

        let positions: Vec<Vector3<f64>> =
            selected.iter().map(|&i| tree.positions[i]).collect();
        self.line_residual(qp, &positions)
    }

    fn try_plane_scan(
        &self,
        qp: &QueryPoint,
        tree: &ScanKdTree,
    ) -> Result<Residual, RejectionCause> {
        let pool = tree.nearest(&qp.q, self.params.plane_neighbors);
        if pool.len() < self.params.plane_neighbors {
            return Err(RejectionCause::NotEnoughNeighbors);
        }
        if pool[0].1 > self.max_icp_distance {
            return Err(RejectionCause::NeighborsTooFar);
        }

        let positions: Vec<Vector3<f64>> =
            pool.iter().map(|&(i, _)| tree.positions[i]).collect();
        self.plane_residual(qp, &positions)
    }

    fn try_edge_map(
        &self,
        qp: &QueryPoint,
        grid: &RollingGrid,
    ) -> Result<Residual, RejectionCause> {
        let mut candidates = self
            .radius_candidates(qp, grid)?;
        if candidates.len() < self.params.line_min_neighbors {
            return Err(RejectionCause::NotEnoughNeighbors);
        }
        candidates.truncate(self.params.line_neighbors);

        // Sample consensus over all candidate pairs: keep the line supported
        // by the most inliers within the inlier distance.
        let inliers = self.consensus_line_inliers(&candidates);
        if inliers.len() < self.params.line_min_neighbors {
            return Err(RejectionCause::NotEnoughNeighbors);
        }

        self.line_residual(qp, &inliers)
    }

    fn try_plane_map(
        &self,
        qp: &QueryPoint,
        grid: &RollingGrid,
    ) -> Result<Residual, RejectionCause> {
        let mut candidates = self.radius_candidates(qp, grid)?;
        if candidates.len() < self.params.plane_neighbors {
            return Err(RejectionCause::NotEnoughNeighbors);
        }
        candidates.truncate(self.params.plane_neighbors);
        self.plane_residual(qp, &candidates)
    }

    /// Map neighbors within the matching radius, closest first.
    fn radius_candidates(
        &self,
        qp: &QueryPoint,
        grid: &RollingGrid,
    ) -> Result<Vec<Vector3<f64>>, RejectionCause> {
        let found = grid
            .query_radius(&Point3::from(qp.q), self.max_icp_distance)
            .map_err(|_| RejectionCause::Other)?;
        let mut candidates: Vec<(f64, Vector3<f64>)> = found
            .into_iter()
            .map(|p| ((p.coords - qp.q).norm_squared(), p.coords))
            .collect();
        candidates.sort_unstable_by(|a, b| {
            a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(candidates.into_iter().map(|(_, p)| p).collect())
    }

    /// Best inlier set over all lines through candidate point pairs. With
    /// bounded neighbor counts the pair enumeration is exhaustive.
    fn consensus_line_inliers(&self, candidates: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let max_dist = self.params.line_max_dist_inlier;
        let mut best: Vec<usize> = Vec::new();
        let mut best_spread = f64::INFINITY;

        for i in 0..candidates.len() {
            for j in i + 1..candidates.len() {
                let dir = candidates[j] - candidates[i];
                let norm = dir.norm();
                if norm < 1e-9 {
                    continue;
                }
                let dir = dir / norm;

                let mut inliers = Vec::new();
                let mut spread = 0.0;
                for (k, p) in candidates.iter().enumerate() {
                    let d = p - candidates[i];
                    let off = (d - dir * dir.dot(&d)).norm();
                    if off <= max_dist {
                        inliers.push(k);
                        spread += off;
                    }
                }

                if inliers.len() > best.len()
                    || (inliers.len() == best.len() && spread < best_spread)
                {
                    best = inliers;
                    best_spread = spread;
                }
            }
        }

        best.into_iter().map(|k| candidates[k]).collect()
    }

    /// Fit a line to the neighborhood and build the point-to-line term.
    fn line_residual(
        &self,
        qp: &QueryPoint,
        positions: &[Vector3<f64>],
    ) -> Result<Residual, RejectionCause> {
        let (mean, cov) = mean_and_covariance(positions);
        if !mean.iter().all(|v| v.is_finite()) {
            return Err(RejectionCause::NanOrSingular);
        }

        let (lambda, axes) = sorted_eigen(&cov);
        if lambda[2] < self.params.line_eigen_factor * lambda[1] {
            return Err(RejectionCause::BadEigenRatio);
        }
        let dir = axes[2];

        // Fit quality: every neighbor must hug the fitted line.
        for p in positions {
            let d = p - mean;
            let off = (d - dir * dir.dot(&d)).norm();
            if off > self.params.max_line_distance {
                return Err(RejectionCause::BadEigenRatio);
            }
        }

        let sigma2 = lambda[0] + lambda[1] + lambda[2];
        if sigma2 <= 1e-12 || !sigma2.is_finite() {
            return Err(RejectionCause::NanOrSingular);
        }

        // Projector onto the plane orthogonal to the line, squared.
        let m = Matrix3::identity() - dir * dir.transpose();
        let a = m.transpose() * m;

        let weight = (-(qp.q - mean).norm_squared() / sigma2).exp();
        if !weight.is_finite() {
            return Err(RejectionCause::NanOrSingular);
        }

        Ok(Residual {
            a,
            p: mean,
            x: qp.x,
            weight,
            time: qp.time,
        })
    }

    /// Fit a plane to the neighborhood and build the point-to-plane term.
    fn plane_residual(
        &self,
        qp: &QueryPoint,
        positions: &[Vector3<f64>],
    ) -> Result<Residual, RejectionCause> {
        let (mean, cov) = mean_and_covariance(positions);
        if !mean.iter().all(|v| v.is_finite()) {
            return Err(RejectionCause::NanOrSingular);
        }

        let (lambda, axes) = sorted_eigen(&cov);
        if lambda[1] <= self.params.plane_eigen_factor2 * lambda[0]
            || lambda[2] >= self.params.plane_eigen_factor1 * lambda[1]
        {
            return Err(RejectionCause::BadEigenRatio);
        }
        let normal = axes[0];

        for p in positions {
            if normal.dot(&(p - mean)).abs() > self.params.max_plane_distance {
                return Err(RejectionCause::BadEigenRatio);
            }
        }

        let sigma2 = lambda[0] + lambda[1] + lambda[2];
        if sigma2 <= 1e-12 || !sigma2.is_finite() {
            return Err(RejectionCause::NanOrSingular);
        }

        let a = normal * normal.transpose();
        let weight = (-(qp.q - mean).norm_squared() / sigma2).exp();
        if !weight.is_finite() {
            return Err(RejectionCause::NanOrSingular);
        }

        Ok(Residual {
            a,
            p: mean,
            x: qp.x,
            weight,
            time: qp.time,
        })
    }
}

/// Sample mean and covariance of a neighborhood.
fn mean_and_covariance(points: &[Vector3<f64>]) -> (Vector3<f64>, Matrix3<f64>) {
    let n = points.len() as f64;
    let mean = points.iter().sum::<Vector3<f64>>() / n;
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p - mean;
        cov += d * d.transpose();
    }
    (mean, cov / n)
}

/// Eigen decomposition with eigenvalues ascending and matching eigenvectors.
fn sorted_eigen(cov: &Matrix3<f64>) -> ([f64; 3], [Vector3<f64>; 3]) {
    let eig = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eig.eigenvalues[a]
            .partial_cmp(&eig.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let lambda = [
        eig.eigenvalues[order[0]].max(0.0),
        eig.eigenvalues[order[1]].max(0.0),
        eig.eigenvalues[order[2]].max(0.0),
    ];
    let axes = [
        eig.eigenvectors.column(order[0]).into_owned(),
        eig.eigenvectors.column(order[1]).into_owned(),
        eig.eigenvectors.column(order[2]).into_owned(),
    ];
    (lambda, axes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchingConfig;

    fn query_at(x: f64, y: f64, z: f64) -> QueryPoint {
        let v = Vector3::new(x, y, z);
        QueryPoint {
            x: v,
            q: v,
            time: 0.0,
        }
    }

    /// A vertical pole sampled by two lasers.
    fn pole_points(x: f64, y: f64) -> Vec<Point> {
        (0..10)
            .map(|i| {
                let mut p = Point::new(x, y, 0.2 * i as f64, i % 2);
                p.time = 0.0;
                p
            })
            .collect()
    }

    /// A flat patch in the z=0 plane.
    fn floor_points() -> Vec<Point> {
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                points.push(Point::new(4.0 + 0.3 * i as f64, 0.3 * j as f64, 0.0, i));
            }
        }
        points
    }

    #[test]
    fn test_edge_scan_match_on_pole() {
        let params = MatchingConfig::ego_motion();
        let matcher = Matcher::new(&params, 20.0);
        let tree = ScanKdTree::build(&pole_points(5.0, 0.0));

        let batch = matcher.match_edges_scan(&[query_at(5.0, 0.0, 1.0)], &tree);
        assert_eq!(batch.residuals.len(), 1);

        let res = &batch.residuals[0];
        // The pole is vertical: the projector must annihilate the z axis.
        let along = res.a * Vector3::new(0.0, 0.0, 1.0);
        assert!(along.norm() < 1e-9);
        // And penalize offsets in x/y.
        let across = res.a * Vector3::new(1.0, 0.0, 0.0);
        assert!(across.norm() > 0.9);
        assert!(res.weight > 0.0 && res.weight <= 1.0);
    }

    #[test]
    fn test_edge_scan_rejects_single_line() {
        let params = MatchingConfig::ego_motion();
        let matcher = Matcher::new(&params, 20.0);
        // All pole points on one laser.
        let points: Vec<Point> = (0..10)
            .map(|i| Point::new(5.0, 0.0, 0.2 * i as f64, 3))
            .collect();
        let tree = ScanKdTree::build(&points);

        let batch = matcher.match_edges_scan(&[query_at(5.0, 0.0, 1.0)], &tree);
        assert!(batch.residuals.is_empty());
        assert_eq!(
            batch.rejections.count(RejectionCause::NotEnoughNeighbors),
            1
        );
    }

    #[test]
    fn test_edge_scan_rejects_empty_tree() {
        let params = MatchingConfig::ego_motion();
        let matcher = Matcher::new(&params, 20.0);
        let tree = ScanKdTree::build(&[]);
        let batch = matcher.match_edges_scan(&[query_at(1.0, 0.0, 0.0)], &tree);
        assert_eq!(
            batch.rejections.count(RejectionCause::NotEnoughNeighbors),
            1
        );
    }

    #[test]
    fn test_plane_scan_match_on_floor() {
        let params = MatchingConfig::ego_motion();
        let matcher = Matcher::new(&params, 20.0);
        let tree = ScanKdTree::build(&floor_points());

        let batch = matcher.match_planes_scan(&[query_at(4.5, 0.5, 0.05)], &tree);
        assert_eq!(batch.residuals.len(), 1);

        let res = &batch.residuals[0];
        // A = n n^T with n = +-z for the floor.
        let up = res.a * Vector3::new(0.0, 0.0, 1.0);
        assert!((up.norm() - 1.0).abs() < 1e-9);
        let lateral = res.a * Vector3::new(1.0, 0.0, 0.0);
        assert!(lateral.norm() < 1e-9);
    }

    #[test]
    fn test_plane_scan_rejects_colinear_neighbors() {
        let params = MatchingConfig::ego_motion();
        let matcher = Matcher::new(&params, 20.0);
        // A line of points is not plane-like.
        let points: Vec<Point> = (0..8)
            .map(|i| Point::new(5.0 + 0.3 * i as f64, 0.0, 0.0, 0))
            .collect();
        let tree = ScanKdTree::build(&points);

        let batch = matcher.match_planes_scan(&[query_at(5.5, 0.0, 0.0)], &tree);
        assert!(batch.residuals.is_empty());
        assert_eq!(batch.rejections.count(RejectionCause::BadEigenRatio), 1);
    }

    #[test]
    fn test_neighbors_too_far() {
        let params = MatchingConfig::ego_motion();
        let matcher = Matcher::new(&params, 2.0);
        let tree = ScanKdTree::build(&pole_points(5.0, 0.0));
        let batch = matcher.match_edges_scan(&[query_at(50.0, 0.0, 0.0)], &tree);
        assert_eq!(batch.rejections.count(RejectionCause::NeighborsTooFar), 1);
    }

    #[test]
    fn test_edge_map_consensus_filters_outlier() {
        let params = MatchingConfig::mapping();
        let matcher = Matcher::new(&params, 20.0);
        let mut grid = RollingGrid::new(10.0, (5, 5, 5), 0.05).unwrap();

        // A vertical pole plus one gross outlier.
        let mut points: Vec<Point3<f64>> = (0..10)
            .map(|i| Point3::new(5.0, 0.0, 0.2 * i as f64))
            .collect();
        points.push(Point3::new(6.5, 1.5, 0.4));
        grid.insert(&points);

        let batch = matcher.match_edges_map(&[query_at(5.0, 0.0, 1.0)], &grid);
        assert_eq!(batch.residuals.len(), 1);

        // The outlier must not drag the fitted line off the pole.
        let res = &batch.residuals[0];
        assert!((res.p.x - 5.0).abs() < 0.05);
        assert!(res.p.y.abs() < 0.05);
    }

    #[test]
    fn test_plane_map_match() {
        let params = MatchingConfig::mapping();
        let matcher = Matcher::new(&params, 20.0);
        let mut grid = RollingGrid::new(10.0, (5, 5, 5), 0.05).unwrap();

        let points: Vec<Point3<f64>> = floor_points()
            .iter()
            .map(|p| Point3::new(p.x, p.y, p.z))
            .collect();
        grid.insert(&points);

        let batch = matcher.match_planes_map(&[query_at(4.5, 0.5, 0.0)], &grid);
        assert_eq!(batch.residuals.len(), 1);
    }

    #[test]
    fn test_histogram_merge() {
        let mut a = RejectionHistogram::default();
        a.record(RejectionCause::Other);
        a.record(RejectionCause::BadEigenRatio);
        let mut b = RejectionHistogram::default();
        b.record(RejectionCause::Other);
        a.merge(&b);
        assert_eq!(a.count(RejectionCause::Other), 2);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn test_sorted_eigen_ascending() {
        let cov = Matrix3::from_diagonal(&Vector3::new(3.0, 1.0, 2.0));
        let (lambda, axes) = sorted_eigen(&cov);
        assert!(lambda[0] <= lambda[1] && lambda[1] <= lambda[2]);
        // The largest eigenvalue belongs to the x axis here.
        assert!((axes[2].x.abs() - 1.0).abs() < 1e-9);
    }
}
