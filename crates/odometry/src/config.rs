//! Estimator configuration.
//!
//! All tunables are instance-scoped; there is no process-wide state. The
//! structs deserialize from TOML with every field optional, falling back to
//! the defaults below.

use crate::OdometryError;
use keypoints::KeypointConfig;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Parameter pack for one ICP stage.
///
/// Both the ego-motion and the mapping stage use this shape; they differ
/// only in their default values (`ego_motion()` / `mapping()`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Levenberg-Marquardt iterations per ICP pass
    pub lm_max_iter: usize,
    /// Outer ICP iterations
    pub icp_max_iter: usize,
    /// Neighbors requested for a line neighborhood
    pub line_neighbors: usize,
    /// Minimum usable neighbors below which a line match is rejected
    pub line_min_neighbors: usize,
    /// Elongation requirement: largest eigenvalue must exceed this factor
    /// times the middle one
    pub line_eigen_factor: f64,
    /// Neighbors requested for a plane neighborhood
    pub plane_neighbors: usize,
    /// Flatness cap: largest eigenvalue must stay below this factor times
    /// the middle one
    pub plane_eigen_factor1: f64,
    /// Flatness requirement: middle eigenvalue must exceed this factor
    /// times the smallest one
    pub plane_eigen_factor2: f64,
    /// Max distance of neighbors to the fitted line (fit quality)
    pub max_line_distance: f64,
    /// Max distance of neighbors to the fitted plane (fit quality)
    pub max_plane_distance: f64,
    /// Sample-consensus inlier distance for mapping edge neighborhoods
    pub line_max_dist_inlier: f64,
}

impl MatchingConfig {
    /// Defaults for frame-to-frame ego-motion estimation.
    pub fn ego_motion() -> Self {
        Self {
            lm_max_iter: 15,
            icp_max_iter: 4,
            line_neighbors: 10,
            line_min_neighbors: 4,
            line_eigen_factor: 5.0,
            plane_neighbors: 5,
            plane_eigen_factor1: 35.0,
            plane_eigen_factor2: 8.0,
            max_line_distance: 0.10,
            max_plane_distance: 0.20,
            line_max_dist_inlier: 0.2,
        }
    }

    /// Defaults for frame-to-map refinement.
    pub fn mapping() -> Self {
        Self {
            lm_max_iter: 15,
            icp_max_iter: 3,
            line_neighbors: 15,
            line_min_neighbors: 5,
            line_eigen_factor: 5.0,
            plane_neighbors: 5,
            plane_eigen_factor1: 35.0,
            plane_eigen_factor2: 8.0,
            max_line_distance: 0.2,
            max_plane_distance: 0.2,
            line_max_dist_inlier: 0.2,
        }
    }

    fn validate(&self, stage: &str) -> Result<(), OdometryError> {
        if self.line_neighbors == 0 || self.plane_neighbors == 0 {
            return Err(OdometryError::InvalidParameter(format!(
                "{stage}: neighbor counts must be positive"
            )));
        }
        if self.line_min_neighbors < 2 {
            return Err(OdometryError::InvalidParameter(format!(
                "{stage}: at least 2 line neighbors are required for a fit"
            )));
        }
        if !(self.max_line_distance > 0.0)
            || !(self.max_plane_distance > 0.0)
            || !(self.line_max_dist_inlier > 0.0)
        {
            return Err(OdometryError::InvalidParameter(format!(
                "{stage}: distance thresholds must be positive"
            )));
        }
        Ok(())
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self::ego_motion()
    }
}

/// Top-level estimator parameters. Persist across sweeps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlamParams {
    /// Rolling-grid leaf-filter voxel size (meters)
    pub leaf_size: f64,
    /// Rolling-grid cell edge length (meters)
    pub voxel_size: f64,
    /// Rolling-grid dimensions in cells
    pub grid_dims: (usize, usize, usize),
    /// Divergence guard: max plausible translation between two sweeps
    /// (90 km/h over a 100 ms sweep)
    pub max_dist_between_two_frames: f64,
    /// Radius cap for map neighbor queries
    pub max_distance_for_icp_matching: f64,
    /// Reuse the ego-motion planar keypoints during mapping; otherwise all
    /// non-invalid points are used
    pub fast_slam: bool,
    /// Per-point motion compensation across the sweep
    pub undistortion: bool,
    /// Attach labeled keypoint clouds to frame summaries
    pub display_mode: bool,
    /// Minimum line+plane residual count to run the solver
    pub min_matches: usize,
    /// Sweep ingestion and keypoint extraction
    pub keypoints: KeypointConfig,
    /// Frame-to-frame stage
    pub ego_motion: MatchingConfig,
    /// Frame-to-map stage
    pub mapping: MatchingConfig,
}

impl Default for SlamParams {
    fn default() -> Self {
        Self {
            leaf_size: 0.6,
            voxel_size: 10.0,
            grid_dims: (21, 21, 21),
            max_dist_between_two_frames: 25.0 * 0.1,
            max_distance_for_icp_matching: 20.0,
            fast_slam: true,
            undistortion: false,
            display_mode: false,
            min_matches: 20,
            keypoints: KeypointConfig::default(),
            ego_motion: MatchingConfig::ego_motion(),
            mapping: MatchingConfig::mapping(),
        }
    }
}

impl SlamParams {
    /// Parse parameters from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, OdometryError> {
        let params: SlamParams =
            toml::from_str(content).map_err(|e| OdometryError::Config(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Load parameters from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self, OdometryError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| OdometryError::Config(e.to_string()))?;
            Self::from_toml_str(&content)
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(SlamParams::default())
        }
    }

    /// Check the programming preconditions that are fatal to the caller.
    pub fn validate(&self) -> Result<(), OdometryError> {
        if !(self.leaf_size > 0.0) || !self.leaf_size.is_finite() {
            return Err(OdometryError::InvalidParameter(format!(
                "leaf_size must be positive, got {}",
                self.leaf_size
            )));
        }
        if !(self.voxel_size > 0.0) || !self.voxel_size.is_finite() {
            return Err(OdometryError::InvalidParameter(format!(
                "voxel_size must be positive, got {}",
                self.voxel_size
            )));
        }
        if self.grid_dims.0 == 0 || self.grid_dims.1 == 0 || self.grid_dims.2 == 0 {
            return Err(OdometryError::InvalidParameter(format!(
                "grid_dims must be positive, got {:?}",
                self.grid_dims
            )));
        }
        if !(self.max_distance_for_icp_matching > 0.0) {
            return Err(OdometryError::InvalidParameter(format!(
                "max_distance_for_icp_matching must be positive, got {}",
                self.max_distance_for_icp_matching
            )));
        }
        if !(self.max_dist_between_two_frames > 0.0) {
            return Err(OdometryError::InvalidParameter(format!(
                "max_dist_between_two_frames must be positive, got {}",
                self.max_dist_between_two_frames
            )));
        }
        self.ego_motion.validate("ego_motion")?;
        self.mapping.validate("mapping")?;
        Ok(())
    }
}
