//! Keypoint extraction: descriptors, invalidation, and capped selection.

use crate::sweep::{ScanLine, Sweep};
use crate::KeypointError;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::warn;
use types::{Label, Point, PointCloud};

/// Spacing factor above the expected azimuthal resolution at which a surface
/// is considered parallel to the beam.
const PARALLEL_BEAM_FACTOR: f64 = 5.0;

/// Saliency below this is a degenerate neighborhood (collapsed or duplicate
/// returns), not a surface.
const SALIENCY_NOISE_FLOOR: f64 = 1e-9;

/// Tunables for sweep ingestion and keypoint extraction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeypointConfig {
    /// Half-width W of the symmetric descriptor neighborhoods
    pub neighbor_width: usize,
    /// Minimum range to the sensor (meters); closer returns are dropped
    pub min_distance_to_sensor: f64,
    /// Azimuthal resolution of the sensor (radians)
    pub angle_resolution: f64,
    /// Angle-score threshold above which a point can be an edge (~60 deg)
    pub edge_sin_angle_threshold: f64,
    /// Angle-score threshold below which a point can be planar (~30 deg)
    pub plane_sin_angle_threshold: f64,
    /// Absolute depth gap (meters) marking an occlusion boundary
    pub edge_depth_gap_threshold: f64,
    /// Cap on edge keypoints per scan line
    pub max_edges_per_line: usize,
    /// Cap on planar keypoints per scan line
    pub max_planars_per_line: usize,
    /// Extract blob keypoints as well
    pub use_blob: bool,
    /// Cap on blob keypoints per scan line
    pub max_blobs_per_line: usize,
    /// Minimum eigenvalue ratio (smallest / largest) for a blob neighborhood
    pub sphericity_threshold: f64,
    /// Below this many edges *and* planars the sweep is under-dense and
    /// yields no keypoints at all
    pub min_keypoints: usize,
}

impl Default for KeypointConfig {
    fn default() -> Self {
        Self {
            neighbor_width: 4,
            min_distance_to_sensor: 3.0,
            angle_resolution: 0.4_f64.to_radians(),
            edge_sin_angle_threshold: 0.86,
            plane_sin_angle_threshold: 0.5,
            edge_depth_gap_threshold: 0.15,
            max_edges_per_line: 200,
            max_planars_per_line: 200,
            use_blob: false,
            max_blobs_per_line: 30,
            sphericity_threshold: 0.35,
            min_keypoints: 10,
        }
    }
}

/// Per-point descriptors for one scan line, parallel to its points.
#[derive(Debug, Clone, Default)]
pub struct LineDescriptors {
    /// sin of the angle between the left and right neighborhood directions:
    /// 0 for colinear, 1 for a sharp corner
    pub angle_score: Vec<f64>,
    /// Signed depth discontinuity to the neighbor with the larger gap
    /// (positive: that neighbor is farther)
    pub depth_gap: Vec<f64>,
    /// Expected azimuthal spacing at this range
    pub length_resolution: Vec<f64>,
    /// Norm of the symmetric second difference of the neighborhood means
    pub saliency: Vec<f64>,
    /// False once a point is rejected by any filter
    pub valid: Vec<bool>,
}

/// Keypoint clouds extracted from one sweep.
#[derive(Debug, Clone, Default)]
pub struct Keypoints {
    pub edges: PointCloud,
    pub planars: PointCloud,
    pub blobs: PointCloud,
}

impl Keypoints {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.planars.is_empty() && self.blobs.is_empty()
    }
}

/// Labels every point of a sweep and selects bounded keypoint sets.
#[derive(Debug, Clone)]
pub struct KeypointExtractor {
    config: KeypointConfig,
}

impl KeypointExtractor {
    pub fn new(config: KeypointConfig) -> Result<Self, KeypointError> {
        if config.neighbor_width == 0 {
            return Err(KeypointError::InvalidNeighborWidth(config.neighbor_width));
        }
        if !(config.min_distance_to_sensor >= 0.0) {
            return Err(KeypointError::InvalidMinDistance(
                config.min_distance_to_sensor,
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &KeypointConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: KeypointConfig) -> Result<(), KeypointError> {
        *self = Self::new(config)?;
        Ok(())
    }

    /// Label every point of the sweep and select keypoints.
    ///
    /// Scan lines are processed in parallel; selection within a line is
    /// sequential (it is order-dependent through non-max suppression).
    /// An under-dense sweep yields an empty result.
    pub fn extract(&self, sweep: &mut Sweep) -> Keypoints {
        let per_line: Vec<(Vec<Point>, Vec<Point>)> = sweep
            .lines
            .par_iter_mut()
            .map(|line| self.process_line(line))
            .collect();

        let mut keypoints = Keypoints::default();
        for (edges, planars) in per_line {
            keypoints.edges.points.extend(edges);
            keypoints.planars.points.extend(planars);
        }

        if keypoints.edges.len() < self.config.min_keypoints
            && keypoints.planars.len() < self.config.min_keypoints
        {
            warn!(
                edges = keypoints.edges.len(),
                planars = keypoints.planars.len(),
                "under-dense sweep, discarding keypoints"
            );
            return Keypoints::default();
        }

        if self.config.use_blob {
            keypoints.blobs = self.select_blobs(sweep);
        }

        keypoints
    }

    fn process_line(&self, line: &mut ScanLine) -> (Vec<Point>, Vec<Point>) {
        let mut desc = self.compute_descriptors(&line.points);
        self.invalidate(&line.points, &mut desc);

        for (p, &valid) in line.points.iter_mut().zip(desc.valid.iter()) {
            if !valid {
                p.label = Label::Invalid;
            }
        }

        let edges = self.select_edges(line, &desc);
        let planars = self.select_planars(line, &desc);
        (edges, planars)
    }

    /// Compute descriptor arrays for one scan line.
    pub fn compute_descriptors(&self, points: &[Point]) -> LineDescriptors {
        let n = points.len();
        let w = self.config.neighbor_width;
        let mut desc = LineDescriptors {
            angle_score: vec![0.0; n],
            depth_gap: vec![0.0; n],
            length_resolution: vec![0.0; n],
            saliency: vec![0.0; n],
            valid: vec![true; n],
        };

        if n < 2 * w + 1 {
            desc.valid.fill(false);
            return desc;
        }

        let pos: Vec<Vector3<f64>> = points
            .iter()
            .map(|p| Vector3::new(p.x, p.y, p.z))
            .collect();
        let ranges: Vec<f64> = points.iter().map(Point::range).collect();

        for i in 0..n {
            desc.length_resolution[i] = self.config.angle_resolution * ranges[i];
        }

        // Points within W of either end have one-sided neighborhoods only.
        for i in 0..w {
            desc.valid[i] = false;
            desc.valid[n - 1 - i] = false;
        }

        for i in w..n - w {
            let left_mean: Vector3<f64> =
                pos[i - w..i].iter().sum::<Vector3<f64>>() / w as f64;
            let right_mean: Vector3<f64> =
                pos[i + 1..=i + w].iter().sum::<Vector3<f64>>() / w as f64;

            let a = pos[i] - left_mean;
            let b = right_mean - pos[i];
            let denom = a.norm() * b.norm();
            if denom > f64::EPSILON {
                desc.angle_score[i] = (a.cross(&b).norm() / denom).clamp(0.0, 1.0);
            } else {
                desc.valid[i] = false;
            }

            desc.saliency[i] = (left_mean + right_mean - 2.0 * pos[i]).norm();

            let gap_prev = ranges[i - 1] - ranges[i];
            let gap_next = ranges[i + 1] - ranges[i];
            desc.depth_gap[i] = if gap_prev.abs() > gap_next.abs() {
                gap_prev
            } else {
                gap_next
            };
        }

        desc
    }

    /// Apply the occlusion, parallel-beam, and saliency filters.
    fn invalidate(&self, points: &[Point], desc: &mut LineDescriptors) {
        let n = points.len();
        let w = self.config.neighbor_width;
        if n < 2 * w + 1 {
            return;
        }

        let pos: Vec<Vector3<f64>> = points
            .iter()
            .map(|p| Vector3::new(p.x, p.y, p.z))
            .collect();
        let ranges: Vec<f64> = points.iter().map(Point::range).collect();
        let gap = self.config.edge_depth_gap_threshold;

        for i in w..n - w {
            if !desc.valid[i] {
                continue;
            }

            // Occlusion boundary: the far side would match to thin air.
            // The near side survives.
            if ranges[i] - ranges[i - 1] > gap || ranges[i] - ranges[i + 1] > gap {
                desc.valid[i] = false;
                continue;
            }

            // Beam-parallel surface: spacing far beyond the expected
            // azimuthal resolution on both sides, with no occlusion to
            // explain it.
            let prev_occluded = (ranges[i - 1] - ranges[i]).abs() > gap;
            let next_occluded = (ranges[i + 1] - ranges[i]).abs() > gap;
            if !prev_occluded && !next_occluded {
                let spacing_prev = (pos[i] - pos[i - 1]).norm();
                let spacing_next = (pos[i + 1] - pos[i]).norm();
                let expected = PARALLEL_BEAM_FACTOR * desc.length_resolution[i];
                if spacing_prev > expected && spacing_next > expected {
                    desc.valid[i] = false;
                    continue;
                }
            }

            if desc.saliency[i] < SALIENCY_NOISE_FLOOR {
                desc.valid[i] = false;
            }
        }
    }

    /// Pick edge keypoints: walk valid points from the sharpest angle score
    /// down, suppressing +-W around each selection.
    fn select_edges(&self, line: &mut ScanLine, desc: &LineDescriptors) -> Vec<Point> {
        let mut order: Vec<usize> = (0..line.points.len())
            .filter(|&i| desc.valid[i])
            .collect();
        order.sort_by(|&a, &b| {
            desc.angle_score[b]
                .partial_cmp(&desc.angle_score[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut suppressed = vec![false; line.points.len()];
        let mut selected = Vec::new();

        for &i in &order {
            if desc.angle_score[i] < self.config.edge_sin_angle_threshold {
                break;
            }
            if selected.len() >= self.config.max_edges_per_line {
                break;
            }
            if suppressed[i] {
                if line.points[i].label == Label::Unlabeled {
                    line.points[i].label = Label::EdgeCandidate;
                }
                continue;
            }

            line.points[i].label = Label::Edge;
            selected.push(line.points[i]);
            self.suppress(&mut suppressed, i, line.points.len());
        }

        selected
    }

    /// Pick planar keypoints: walk valid points from the flattest angle
    /// score up, with its own suppression set.
    fn select_planars(&self, line: &mut ScanLine, desc: &LineDescriptors) -> Vec<Point> {
        let mut order: Vec<usize> = (0..line.points.len())
            .filter(|&i| desc.valid[i])
            .collect();
        order.sort_by(|&a, &b| {
            desc.angle_score[a]
                .partial_cmp(&desc.angle_score[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut suppressed = vec![false; line.points.len()];
        let mut selected = Vec::new();

        for &i in &order {
            if desc.angle_score[i] > self.config.plane_sin_angle_threshold {
                break;
            }
            if selected.len() >= self.config.max_planars_per_line {
                break;
            }
            if suppressed[i] || line.points[i].label == Label::Edge {
                if line.points[i].label == Label::Unlabeled {
                    line.points[i].label = Label::PlanarCandidate;
                }
                continue;
            }

            line.points[i].label = Label::Planar;
            selected.push(line.points[i]);
            self.suppress(&mut suppressed, i, line.points.len());
        }

        selected
    }

    /// Pick blob keypoints: points whose 3-D neighborhood (across scan
    /// lines) is isotropic. The neighborhood comes from a kd-tree over the
    /// whole sweep, since an along-line window is planar at best.
    fn select_blobs(&self, sweep: &Sweep) -> PointCloud {
        let w = self.config.neighbor_width;
        let k = 2 * w + 1;

        // All still-selectable points, tagged with their (line, position).
        let mut tree: KdTree<f64, 3> = KdTree::new();
        let mut tagged: Vec<(usize, usize)> = Vec::new();
        let mut positions: Vec<Vector3<f64>> = Vec::new();
        for (li, line) in sweep.lines.iter().enumerate() {
            for (pi, p) in line.points.iter().enumerate() {
                if p.label.selectable() {
                    tree.add(&[p.x, p.y, p.z], tagged.len() as u64);
                    tagged.push((li, pi));
                    positions.push(Vector3::new(p.x, p.y, p.z));
                }
            }
        }
        if tagged.len() < k {
            return PointCloud::default();
        }

        let mut candidates: Vec<(usize, f64)> = Vec::new();
        for (idx, pos) in positions.iter().enumerate() {
            let neighbors = tree.nearest_n::<SquaredEuclidean>(&[pos.x, pos.y, pos.z], k);
            if neighbors.len() < k {
                continue;
            }

            let mean: Vector3<f64> = neighbors
                .iter()
                .map(|n| positions[n.item as usize])
                .sum::<Vector3<f64>>()
                / neighbors.len() as f64;
            let mut cov = Matrix3::zeros();
            for n in &neighbors {
                let d = positions[n.item as usize] - mean;
                cov += d * d.transpose();
            }
            cov /= neighbors.len() as f64;

            let eig = cov.symmetric_eigen();
            let mut lambda: Vec<f64> = eig.eigenvalues.iter().map(|&l| l.max(0.0)).collect();
            lambda.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            if lambda[2] <= f64::EPSILON {
                continue;
            }
            let sphericity = lambda[0] / lambda[2];
            if sphericity >= self.config.sphericity_threshold {
                candidates.push((idx, sphericity));
            }
        }

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Per-line cap and suppression, same scheme as edges and planars.
        let mut suppressed: Vec<Vec<bool>> = sweep
            .lines
            .iter()
            .map(|line| vec![false; line.points.len()])
            .collect();
        let mut counts = vec![0usize; sweep.lines.len()];
        let mut selected = PointCloud::default();

        for (idx, _) in candidates {
            let (li, pi) = tagged[idx];
            if counts[li] >= self.config.max_blobs_per_line || suppressed[li][pi] {
                continue;
            }
            selected.push(sweep.lines[li].points[pi]);
            counts[li] += 1;
            let len = suppressed[li].len();
            self.suppress(&mut suppressed[li], pi, len);
        }

        selected
    }

    fn suppress(&self, suppressed: &mut [bool], center: usize, len: usize) {
        let w = self.config.neighbor_width;
        let lo = center.saturating_sub(w);
        let hi = (center + w).min(len - 1);
        for s in suppressed.iter_mut().take(hi + 1).skip(lo) {
            *s = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::ScanLine;

    fn line_from_positions(positions: &[(f64, f64, f64)]) -> ScanLine {
        ScanLine {
            points: positions
                .iter()
                .map(|&(x, y, z)| Point::new(x, y, z, 0))
                .collect(),
            source_indices: (0..positions.len()).collect(),
        }
    }

    /// A straight wall segment with a sharp corner in the middle, roughly
    /// 5 m from the sensor.
    fn corner_line(n_side: usize) -> ScanLine {
        let mut positions = Vec::new();
        for i in 0..n_side {
            positions.push((5.0, -0.05 * (n_side - i) as f64, 0.0));
        }
        positions.push((5.0, 0.0, 0.0));
        for i in 1..=n_side {
            positions.push((5.0 - 0.05 * i as f64, 0.0, 0.0));
        }
        line_from_positions(&positions)
    }

    fn default_extractor() -> KeypointExtractor {
        KeypointExtractor::new(KeypointConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_zero_width() {
        let config = KeypointConfig {
            neighbor_width: 0,
            ..Default::default()
        };
        assert!(KeypointExtractor::new(config).is_err());
    }

    #[test]
    fn test_straight_line_has_low_scores() {
        let extractor = default_extractor();
        let positions: Vec<_> = (0..30).map(|i| (5.0, 0.05 * i as f64, 0.0)).collect();
        let line = line_from_positions(&positions);
        let desc = extractor.compute_descriptors(&line.points);

        let w = extractor.config().neighbor_width;
        for i in w..line.len() - w {
            assert!(desc.angle_score[i] < 0.05, "score {} at {}", desc.angle_score[i], i);
        }
    }

    #[test]
    fn test_corner_scores_high() {
        let extractor = default_extractor();
        let line = corner_line(12);
        let corner = 12;
        let desc = extractor.compute_descriptors(&line.points);
        assert!(desc.angle_score[corner] > 0.9, "score {}", desc.angle_score[corner]);
    }

    #[test]
    fn test_margin_points_invalid() {
        let extractor = default_extractor();
        let positions: Vec<_> = (0..20).map(|i| (5.0, 0.05 * i as f64, 0.0)).collect();
        let line = line_from_positions(&positions);
        let desc = extractor.compute_descriptors(&line.points);

        let w = extractor.config().neighbor_width;
        for i in 0..w {
            assert!(!desc.valid[i]);
            assert!(!desc.valid[line.len() - 1 - i]);
        }
    }

    #[test]
    fn test_occlusion_far_side_invalidated() {
        let extractor = default_extractor();
        // A wall at 10 m with a 1 m step up; the far side of the step is an
        // occlusion artifact, the near side a legitimate surface end.
        let mut positions = Vec::new();
        for i in 0..12 {
            positions.push((10.0, 0.07 * i as f64, 0.0));
        }
        for i in 12..24 {
            positions.push((11.0, 0.07 * i as f64, 0.0));
        }
        let line = line_from_positions(&positions);
        let mut desc = extractor.compute_descriptors(&line.points);
        extractor.invalidate(&line.points, &mut desc);

        // Far side (first point at 11 m): invalid.
        assert!(!desc.valid[12]);
        // Near side (last point at 10 m): survives.
        assert!(desc.valid[11]);
    }

    #[test]
    fn test_edge_selection_and_nms() {
        let mut config = KeypointConfig::default();
        config.max_edges_per_line = 5;
        let extractor = KeypointExtractor::new(config).unwrap();

        let mut line = corner_line(12);
        let desc = {
            let mut d = extractor.compute_descriptors(&line.points);
            extractor.invalidate(&line.points, &mut d);
            d
        };
        let edges = extractor.select_edges(&mut line, &desc);

        assert!(!edges.is_empty());
        assert!(edges.len() <= 5);

        // Selected edges are labeled and never invalid.
        let selected: Vec<usize> = line
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.label == Label::Edge)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(selected.len(), edges.len());

        // Non-max suppression: selected indices at least W+1 apart.
        let w = extractor.config().neighbor_width;
        for pair in selected.windows(2) {
            assert!(pair[1] - pair[0] >= w + 1);
        }
    }

    #[test]
    fn test_planar_selection_respects_cap_and_nms() {
        let mut config = KeypointConfig::default();
        config.max_planars_per_line = 3;
        let extractor = KeypointExtractor::new(config).unwrap();

        // A flat wall sampled at equal angular steps, the way a spinning
        // sensor actually sees it.
        let positions: Vec<_> = (0..60)
            .map(|i| {
                let theta = (-30.0 + i as f64).to_radians();
                (5.0, 5.0 * theta.tan(), 0.0)
            })
            .collect();
        let mut line = line_from_positions(&positions);
        let desc = {
            let mut d = extractor.compute_descriptors(&line.points);
            extractor.invalidate(&line.points, &mut d);
            d
        };
        let planars = extractor.select_planars(&mut line, &desc);

        assert_eq!(planars.len(), 3);
        let selected: Vec<usize> = line
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.label == Label::Planar)
            .map(|(i, _)| i)
            .collect();
        let w = extractor.config().neighbor_width;
        for pair in selected.windows(2) {
            assert!(pair[1] - pair[0] >= w + 1);
        }
    }

    #[test]
    fn test_invalid_never_selected() {
        let extractor = default_extractor();
        let mut sweep = Sweep {
            lines: vec![corner_line(12)],
            dropped: 0,
            unknown_laser: 0,
        };
        // Force under-dense path off by duplicating lines.
        for _ in 0..10 {
            sweep.lines.push(corner_line(12));
        }
        let keypoints = extractor.extract(&mut sweep);
        for p in keypoints.edges.iter().chain(keypoints.planars.iter()) {
            assert_ne!(p.label, Label::Invalid);
        }
        for line in &sweep.lines {
            for p in &line.points {
                if p.label == Label::Edge || p.label == Label::Planar {
                    assert!(p.label.selectable());
                }
            }
        }
    }

    #[test]
    fn test_under_dense_sweep_yields_empty() {
        let mut config = KeypointConfig::default();
        config.min_keypoints = 10;
        let extractor = KeypointExtractor::new(config).unwrap();

        // One short line cannot produce 10 of anything.
        let positions: Vec<_> = (0..12).map(|i| (5.0, 0.05 * i as f64, 0.0)).collect();
        let mut sweep = Sweep {
            lines: vec![line_from_positions(&positions)],
            dropped: 0,
            unknown_laser: 0,
        };
        let keypoints = extractor.extract(&mut sweep);
        assert!(keypoints.is_empty());
    }

    #[test]
    fn test_blob_selection_on_isotropic_cluster() {
        let mut config = KeypointConfig::default();
        config.use_blob = true;
        config.min_keypoints = 0;
        let extractor = KeypointExtractor::new(config).unwrap();

        // A smooth 3-D curl: successive range gaps stay below the occlusion
        // threshold while the neighborhood spreads in all three directions.
        let positions: Vec<_> = (0..60)
            .map(|i| {
                let t = i as f64;
                (5.0 + 0.1 * t.cos(), 0.03 * t, 0.1 * t.sin())
            })
            .collect();
        let mut sweep = Sweep {
            lines: vec![line_from_positions(&positions)],
            dropped: 0,
            unknown_laser: 0,
        };

        let keypoints = extractor.extract(&mut sweep);
        assert!(!keypoints.blobs.is_empty());
        assert!(keypoints.blobs.len() <= extractor.config().max_blobs_per_line);
    }

    #[test]
    fn test_blob_extraction_disabled_by_default() {
        let extractor = default_extractor();
        let mut sweep = Sweep {
            lines: (0..12).map(|_| corner_line(12)).collect(),
            dropped: 0,
            unknown_laser: 0,
        };
        let keypoints = extractor.extract(&mut sweep);
        assert!(keypoints.blobs.is_empty());
    }
}
