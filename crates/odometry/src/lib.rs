//! LiDAR odometry and mapping for spinning multi-beam sensors.
//!
//! Per incoming sweep:
//! 1. Re-order points into azimuth-sorted scan lines
//! 2. Extract edge and planar keypoints per line
//! 3. Estimate the frame-to-frame motion by ICP against the previous
//!    sweep's keypoints
//! 4. Refine the world pose by ICP against the rolling local map
//! 5. Fold the sweep's keypoints into the map and commit the pose
//!
//! `add_frame` is synchronous and returns once the sweep's pose is
//! committed. Sweeps must be submitted in acquisition order. Degraded
//! sweeps (under-dense, unmatched, diverged) never fail the call; they are
//! reported as a skipped outcome with the pose left untouched.

use keypoints::{KeypointConfig, KeypointExtractor, Keypoints, Sweep, SweepIngestor};
use matching::{Matcher, QueryPoint, ScanKdTree};
use nalgebra::{Point3, Vector3, Vector6};
use thiserror::Error;
use tracing::{debug, info, warn};
use transforms::{PoseInterpolator, Transform3D};
use types::{Label, Point, PointCloud, Pose};
use voxelmap::RollingGrid;

mod config;
mod matching;
mod solver;

pub use config::{MatchingConfig, SlamParams};
pub use matching::{MatchStep, RejectionCause, RejectionHistogram};

#[derive(Error, Debug)]
pub enum OdometryError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Map(#[from] voxelmap::VoxelMapError),
    #[error(transparent)]
    Keypoints(#[from] keypoints::KeypointError),
}

/// Why a sweep's pose update was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Too few keypoints were extracted from the sweep
    UnderDenseSweep,
    /// Neither stage accumulated enough residual terms
    InsufficientMatches,
    /// The divergence guard tripped; `Trelative` was reset to identity
    Diverged,
}

/// What happened to one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// First usable sweep; world pose initialized to identity
    Initialized,
    /// Pose estimated and committed
    Tracked,
    /// Pose not updated this sweep
    Skipped(SkipReason),
}

/// Per-stage diagnostics for one sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageStats {
    /// Residual terms accumulated in the last ICP iteration
    pub matches: usize,
    /// Outer ICP iterations run
    pub icp_iterations: usize,
    /// Total LM iterations across ICP passes
    pub lm_iterations: usize,
    /// Objective value after the last solve
    pub final_cost: f64,
    /// At least one LM solve was accepted
    pub solved: bool,
    /// The stage gave up for lack of matches
    pub insufficient: bool,
    /// The normal system went singular
    pub singular: bool,
    /// The divergence guard tripped
    pub diverged: bool,
}

/// Labeled clouds attached to summaries in display mode.
#[derive(Debug, Clone)]
pub struct DebugClouds {
    pub edges: PointCloud,
    pub planars: PointCloud,
    pub blobs: PointCloud,
    pub rejected: PointCloud,
}

/// Result of processing one sweep.
#[derive(Debug, Clone)]
pub struct FrameSummary {
    pub outcome: FrameOutcome,
    /// World pose after this sweep
    pub pose: Pose,
    pub edges: usize,
    pub planars: usize,
    pub blobs: usize,
    pub ego: StageStats,
    pub mapping: StageStats,
    /// Present when `display_mode` is set
    pub debug: Option<DebugClouds>,
}

/// The estimator. Owns the rolling maps, the trajectory, and all state
/// persisted between sweeps.
pub struct LidarOdometry {
    params: SlamParams,
    ingestor: SweepIngestor,
    extractor: KeypointExtractor,
    edge_grid: RollingGrid,
    planar_grid: RollingGrid,
    blob_grid: RollingGrid,
    /// Current sweep pose in world frame
    tworld: Transform3D,
    /// World pose of the sweep before the current one
    previous_tworld: Transform3D,
    /// Previous -> current sweep transform, in the previous sweep's frame
    trelative: Transform3D,
    /// World pose at the end of every sweep, in submission order
    trajectory: Vec<Pose>,
    previous_edges: Vec<Point>,
    previous_planars: Vec<Point>,
    ego_rejections: RejectionHistogram,
    mapping_rejections: RejectionHistogram,
    initialized: bool,
}

impl LidarOdometry {
    pub fn new(params: SlamParams) -> Result<Self, OdometryError> {
        params.validate()?;
        let edge_grid = RollingGrid::new(params.voxel_size, params.grid_dims, params.leaf_size)?;
        let planar_grid = RollingGrid::new(params.voxel_size, params.grid_dims, params.leaf_size)?;
        let blob_grid = RollingGrid::new(params.voxel_size, params.grid_dims, params.leaf_size)?;
        let ingestor = SweepIngestor::new(params.keypoints.min_distance_to_sensor);
        let extractor = KeypointExtractor::new(params.keypoints.clone())?;

        Ok(Self {
            params,
            ingestor,
            extractor,
            edge_grid,
            planar_grid,
            blob_grid,
            tworld: Transform3D::identity(),
            previous_tworld: Transform3D::identity(),
            trelative: Transform3D::identity(),
            trajectory: Vec::new(),
            previous_edges: Vec::new(),
            previous_planars: Vec::new(),
            ego_rejections: RejectionHistogram::default(),
            mapping_rejections: RejectionHistogram::default(),
            initialized: false,
        })
    }

    /// Ingest one sweep and commit its pose.
    pub fn add_frame(&mut self, cloud: &PointCloud) -> Result<FrameSummary, OdometryError> {
        let mut sweep = self.ingestor.ingest(cloud);
        let keypoints = self.extractor.extract(&mut sweep);

        debug!(
            points = sweep.num_points(),
            edges = keypoints.edges.len(),
            planars = keypoints.planars.len(),
            "ingested sweep"
        );

        if !self.initialized {
            if keypoints.is_empty() {
                warn!("cannot initialize from an under-dense sweep");
                self.trajectory.push(self.tworld.to_pose());
                return Ok(self.summary(
                    FrameOutcome::Skipped(SkipReason::UnderDenseSweep),
                    &sweep,
                    &keypoints,
                    StageStats::default(),
                    StageStats::default(),
                ));
            }
            let origin = self.tworld;
            self.update_maps(&keypoints, &origin);
            self.previous_edges = keypoints.edges.points.clone();
            self.previous_planars = keypoints.planars.points.clone();
            self.trajectory.push(self.tworld.to_pose());
            self.initialized = true;
            info!(
                edges = keypoints.edges.len(),
                planars = keypoints.planars.len(),
                "initialized at origin"
            );
            return Ok(self.summary(
                FrameOutcome::Initialized,
                &sweep,
                &keypoints,
                StageStats::default(),
                StageStats::default(),
            ));
        }

        if keypoints.is_empty() {
            warn!("under-dense sweep, keeping previous pose");
            self.trajectory.push(self.tworld.to_pose());
            return Ok(self.summary(
                FrameOutcome::Skipped(SkipReason::UnderDenseSweep),
                &sweep,
                &keypoints,
                StageStats::default(),
                StageStats::default(),
            ));
        }

        // Frame-to-frame stage, seeded with the constant-velocity prior.
        let (trelative, ego_stats, ego_hist) = self.run_ego_motion(&keypoints);
        self.ego_rejections.merge(&ego_hist);
        self.trelative = trelative;

        if ego_stats.diverged {
            self.trajectory.push(self.tworld.to_pose());
            return Ok(self.summary(
                FrameOutcome::Skipped(SkipReason::Diverged),
                &sweep,
                &keypoints,
                ego_stats,
                StageStats::default(),
            ));
        }

        // Frame-to-map stage.
        let all_valid;
        let planar_source: &PointCloud = if self.params.fast_slam {
            &keypoints.planars
        } else {
            all_valid = sweep.valid_points();
            &all_valid
        };
        let trelative = self.trelative;
        let (tworld_new, map_stats, map_hist) =
            self.run_mapping(&keypoints, planar_source, &trelative);
        self.mapping_rejections.merge(&map_hist);

        if !ego_stats.solved && !map_stats.solved {
            warn!("no stage accumulated enough matches, keeping previous pose");
            self.trajectory.push(self.tworld.to_pose());
            // The sweep itself is healthy; let it serve the next frame.
            self.previous_edges = keypoints.edges.points.clone();
            self.previous_planars = keypoints.planars.points.clone();
            return Ok(self.summary(
                FrameOutcome::Skipped(SkipReason::InsufficientMatches),
                &sweep,
                &keypoints,
                ego_stats,
                map_stats,
            ));
        }

        // Commit: Tworld, Trelative, trajectory, maps, and the Previous*
        // clouds advance together.
        let previous = self.tworld;
        self.previous_tworld = previous;
        self.tworld = tworld_new;
        self.trelative = previous.relative_to(&self.tworld);
        self.update_maps(&keypoints, &previous);
        self.previous_edges = keypoints.edges.points.clone();
        self.previous_planars = keypoints.planars.points.clone();
        self.trajectory.push(self.tworld.to_pose());

        let pose = self.tworld.to_pose();
        info!(
            tx = pose.tx,
            ty = pose.ty,
            tz = pose.tz,
            rz = pose.rz,
            "committed sweep pose"
        );

        Ok(self.summary(FrameOutcome::Tracked, &sweep, &keypoints, ego_stats, map_stats))
    }

    /// Current world pose as a 6-tuple.
    pub fn world_transform(&self) -> Pose {
        self.tworld.to_pose()
    }

    /// Previous -> current sweep transform.
    pub fn relative_transform(&self) -> Pose {
        self.trelative.to_pose()
    }

    /// World pose at the end of every processed sweep.
    pub fn trajectory(&self) -> &[Pose] {
        &self.trajectory
    }

    pub fn params(&self) -> &SlamParams {
        &self.params
    }

    pub fn ego_rejections(&self) -> &RejectionHistogram {
        &self.ego_rejections
    }

    pub fn mapping_rejections(&self) -> &RejectionHistogram {
        &self.mapping_rejections
    }

    /// Scan line count, once discovered from the first sweep.
    pub fn num_scan_lines(&self) -> Option<usize> {
        self.ingestor.num_lines()
    }

    /// Total points across the three rolling maps.
    pub fn map_points(&self) -> usize {
        self.edge_grid.num_points() + self.planar_grid.num_points() + self.blob_grid.num_points()
    }

    /// Edge keypoints currently stored in the map window.
    pub fn edge_map_points(&self) -> Vec<Point3<f64>> {
        self.edge_grid.all_points()
    }

    /// Planar keypoints currently stored in the map window.
    pub fn planar_map_points(&self) -> Vec<Point3<f64>> {
        self.planar_grid.all_points()
    }

    pub fn set_leaf_size(&mut self, leaf_size: f64) -> Result<(), OdometryError> {
        self.edge_grid.set_leaf_size(leaf_size)?;
        self.planar_grid.set_leaf_size(leaf_size)?;
        self.blob_grid.set_leaf_size(leaf_size)?;
        self.params.leaf_size = leaf_size;
        Ok(())
    }

    pub fn set_voxel_size(&mut self, voxel_size: f64) -> Result<(), OdometryError> {
        self.edge_grid.set_voxel_size(voxel_size)?;
        self.planar_grid.set_voxel_size(voxel_size)?;
        self.blob_grid.set_voxel_size(voxel_size)?;
        self.params.voxel_size = voxel_size;
        Ok(())
    }

    pub fn set_grid_dims(&mut self, dims: (usize, usize, usize)) -> Result<(), OdometryError> {
        self.edge_grid.set_dims(dims)?;
        self.planar_grid.set_dims(dims)?;
        self.blob_grid.set_dims(dims)?;
        self.params.grid_dims = dims;
        Ok(())
    }

    pub fn set_undistortion(&mut self, enabled: bool) {
        self.params.undistortion = enabled;
    }

    pub fn set_fast_slam(&mut self, enabled: bool) {
        self.params.fast_slam = enabled;
    }

    pub fn set_display_mode(&mut self, enabled: bool) {
        self.params.display_mode = enabled;
    }

    pub fn set_max_dist_between_two_frames(&mut self, dist: f64) -> Result<(), OdometryError> {
        if !(dist > 0.0) {
            return Err(OdometryError::InvalidParameter(format!(
                "max_dist_between_two_frames must be positive, got {dist}"
            )));
        }
        self.params.max_dist_between_two_frames = dist;
        Ok(())
    }

    pub fn set_max_distance_for_icp_matching(&mut self, dist: f64) -> Result<(), OdometryError> {
        if !(dist > 0.0) {
            return Err(OdometryError::InvalidParameter(format!(
                "max_distance_for_icp_matching must be positive, got {dist}"
            )));
        }
        self.params.max_distance_for_icp_matching = dist;
        Ok(())
    }

    pub fn set_min_matches(&mut self, min_matches: usize) {
        self.params.min_matches = min_matches;
    }

    pub fn set_keypoint_config(&mut self, config: KeypointConfig) -> Result<(), OdometryError> {
        self.extractor.set_config(config.clone())?;
        self.ingestor
            .set_min_distance_to_sensor(config.min_distance_to_sensor);
        self.params.keypoints = config;
        Ok(())
    }

    pub fn set_matching_config(
        &mut self,
        step: MatchStep,
        config: MatchingConfig,
    ) -> Result<(), OdometryError> {
        let slot = match step {
            MatchStep::EgoMotion => &mut self.params.ego_motion,
            MatchStep::Mapping => &mut self.params.mapping,
        };
        let old = std::mem::replace(slot, config);
        if let Err(e) = self.params.validate() {
            match step {
                MatchStep::EgoMotion => self.params.ego_motion = old,
                MatchStep::Mapping => self.params.mapping = old,
            }
            return Err(e);
        }
        Ok(())
    }

    /// Frame-to-frame ICP against the previous sweep's keypoints.
    fn run_ego_motion(
        &self,
        keypoints: &Keypoints,
    ) -> (Transform3D, StageStats, RejectionHistogram) {
        let params = &self.params.ego_motion;
        let mut stats = StageStats::default();
        let mut hist = RejectionHistogram::default();
        let mut estimate = self.trelative;

        if self.previous_edges.is_empty() && self.previous_planars.is_empty() {
            stats.insufficient = true;
            return (estimate, stats, hist);
        }

        let edge_tree = ScanKdTree::build(&self.previous_edges);
        let planar_tree = ScanKdTree::build(&self.previous_planars);
        let matcher = Matcher::new(params, self.params.max_distance_for_icp_matching);
        let identity = Transform3D::identity();

        for icp in 0..params.icp_max_iter {
            stats.icp_iterations = icp + 1;

            let edge_queries = make_queries(
                &keypoints.edges,
                &identity,
                &estimate,
                self.params.undistortion,
            );
            let planar_queries = make_queries(
                &keypoints.planars,
                &identity,
                &estimate,
                self.params.undistortion,
            );

            let mut batch = matcher.match_edges_scan(&edge_queries, &edge_tree);
            batch.merge_in(matcher.match_planes_scan(&planar_queries, &planar_tree));
            hist.merge(&batch.rejections);
            stats.matches = batch.residuals.len();

            if batch.residuals.len() < self.params.min_matches {
                debug!(
                    matches = batch.residuals.len(),
                    "ego-motion: not enough matches"
                );
                if !stats.solved {
                    stats.insufficient = true;
                }
                break;
            }

            let outcome =
                solver::minimize(pose_vec(&estimate), &batch.residuals, params.lm_max_iter);
            stats.lm_iterations += outcome.iterations;
            stats.final_cost = outcome.final_cost;

            if outcome.singular {
                debug!("ego-motion: singular system, dropping increment");
                stats.singular = true;
                hist.record(RejectionCause::NanOrSingular);
                break;
            }

            let candidate = vec_pose(&outcome.pose);
            if candidate.translation().norm() > self.params.max_dist_between_two_frames {
                warn!(
                    translation = candidate.translation().norm(),
                    guard = self.params.max_dist_between_two_frames,
                    "ego-motion diverged, resetting relative transform"
                );
                stats.diverged = true;
                hist.record(RejectionCause::TransformDiverged);
                estimate = Transform3D::identity();
                break;
            }

            count_late_residuals(&outcome.pose, &batch.residuals, &mut hist);

            let delta = estimate.relative_to(&candidate);
            estimate = candidate;
            stats.solved = true;

            if delta.translation().norm() < 1e-6 && delta.rotation_angle() < 1e-7 {
                break;
            }
        }

        (estimate, stats, hist)
    }

    /// Frame-to-map ICP against the rolling grids.
    fn run_mapping(
        &self,
        keypoints: &Keypoints,
        planar_source: &PointCloud,
        trelative: &Transform3D,
    ) -> (Transform3D, StageStats, RejectionHistogram) {
        let params = &self.params.mapping;
        let mut stats = StageStats::default();
        let mut hist = RejectionHistogram::default();
        let prior = self.tworld * trelative;
        let mut estimate = prior;

        if self.edge_grid.is_empty() && self.planar_grid.is_empty() {
            stats.insufficient = true;
            return (estimate, stats, hist);
        }

        let matcher = Matcher::new(params, self.params.max_distance_for_icp_matching);

        for icp in 0..params.icp_max_iter {
            stats.icp_iterations = icp + 1;

            let edge_queries = make_queries(
                &keypoints.edges,
                &self.tworld,
                &estimate,
                self.params.undistortion,
            );
            let planar_queries = make_queries(
                planar_source,
                &self.tworld,
                &estimate,
                self.params.undistortion,
            );

            let mut batch = matcher.match_edges_map(&edge_queries, &self.edge_grid);
            batch.merge_in(matcher.match_planes_map(&planar_queries, &self.planar_grid));
            hist.merge(&batch.rejections);
            stats.matches = batch.residuals.len();

            if batch.residuals.len() < self.params.min_matches {
                debug!(matches = batch.residuals.len(), "mapping: not enough matches");
                if !stats.solved {
                    stats.insufficient = true;
                }
                break;
            }

            let outcome =
                solver::minimize(pose_vec(&estimate), &batch.residuals, params.lm_max_iter);
            stats.lm_iterations += outcome.iterations;
            stats.final_cost = outcome.final_cost;

            if outcome.singular {
                debug!("mapping: singular system, dropping increment");
                stats.singular = true;
                hist.record(RejectionCause::NanOrSingular);
                break;
            }

            let candidate = vec_pose(&outcome.pose);
            let increment = self.tworld.relative_to(&candidate);
            if increment.translation().norm() > self.params.max_dist_between_two_frames {
                warn!(
                    translation = increment.translation().norm(),
                    "mapping diverged, keeping ego-motion pose"
                );
                stats.diverged = true;
                hist.record(RejectionCause::TransformDiverged);
                estimate = prior;
                break;
            }

            count_late_residuals(&outcome.pose, &batch.residuals, &mut hist);

            let delta = estimate.relative_to(&candidate);
            estimate = candidate;
            stats.solved = true;

            if delta.translation().norm() < 1e-6 && delta.rotation_angle() < 1e-7 {
                break;
            }
        }

        (estimate, stats, hist)
    }

    /// Roll the grids to the committed pose and insert the sweep's
    /// keypoints in world coordinates.
    fn update_maps(&mut self, keypoints: &Keypoints, previous_world: &Transform3D) {
        let world = self.tworld;
        let anchor = Point3::from(world.translation());
        self.edge_grid.recenter(&anchor);
        self.planar_grid.recenter(&anchor);
        self.blob_grid.recenter(&anchor);

        let interp = self
            .params
            .undistortion
            .then(|| PoseInterpolator::new(previous_world, &world));
        let to_world = |p: &Point| -> Point3<f64> {
            let raw = Vector3::new(p.x, p.y, p.z);
            match &interp {
                Some(it) => Point3::from(it.at(p.time).transform_point(raw)),
                None => Point3::from(world.transform_point(raw)),
            }
        };

        let edges: Vec<Point3<f64>> = keypoints.edges.iter().map(&to_world).collect();
        let planars: Vec<Point3<f64>> = keypoints.planars.iter().map(&to_world).collect();
        let blobs: Vec<Point3<f64>> = keypoints.blobs.iter().map(&to_world).collect();

        self.edge_grid.insert(&edges);
        self.planar_grid.insert(&planars);
        self.blob_grid.insert(&blobs);
    }

    fn summary(
        &self,
        outcome: FrameOutcome,
        sweep: &Sweep,
        keypoints: &Keypoints,
        ego: StageStats,
        mapping: StageStats,
    ) -> FrameSummary {
        let debug = self.params.display_mode.then(|| DebugClouds {
            edges: keypoints.edges.clone(),
            planars: keypoints.planars.clone(),
            blobs: keypoints.blobs.clone(),
            rejected: sweep
                .iter_points()
                .filter(|p| p.label == Label::Invalid)
                .copied()
                .collect(),
        });

        FrameSummary {
            outcome,
            pose: self.tworld.to_pose(),
            edges: keypoints.edges.len(),
            planars: keypoints.planars.len(),
            blobs: keypoints.blobs.len(),
            ego,
            mapping,
            debug,
        }
    }
}

/// Prepare keypoints for matching under the current estimate.
///
/// With undistortion the interpolator spans `start` at t=0 to `estimate` at
/// t=1; each point is re-expressed at sweep end so the solver optimizes a
/// single rigid transform.
fn make_queries(
    cloud: &PointCloud,
    start: &Transform3D,
    estimate: &Transform3D,
    undistort: bool,
) -> Vec<QueryPoint> {
    if undistort {
        let interp = PoseInterpolator::new(start, estimate);
        let est_inv = estimate.inverse();
        cloud
            .iter()
            .map(|p| {
                let raw = Vector3::new(p.x, p.y, p.z);
                let q = interp.at(p.time).transform_point(raw);
                QueryPoint {
                    x: est_inv.transform_point(q),
                    q,
                    time: p.time,
                }
            })
            .collect()
    } else {
        cloud
            .iter()
            .map(|p| {
                let raw = Vector3::new(p.x, p.y, p.z);
                QueryPoint {
                    x: raw,
                    q: estimate.transform_point(raw),
                    time: p.time,
                }
            })
            .collect()
    }
}

fn pose_vec(tf: &Transform3D) -> Vector6<f64> {
    let p = tf.to_pose();
    Vector6::new(p.rx, p.ry, p.rz, p.tx, p.ty, p.tz)
}

fn vec_pose(v: &Vector6<f64>) -> Transform3D {
    Transform3D::new(v[0], v[1], v[2], v[3], v[4], v[5])
}

/// Tally terms whose error stayed large after the solve.
fn count_late_residuals(
    pose: &Vector6<f64>,
    residuals: &[matching::Residual],
    hist: &mut RejectionHistogram,
) {
    let dists = solver::term_distances(pose, residuals);
    let med = median(&dists);
    let threshold = (4.0 * med).max(1e-3);
    for _ in dists.iter().filter(|&&d| d > threshold) {
        hist.record(RejectionCause::ResidualTooLarge);
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}
