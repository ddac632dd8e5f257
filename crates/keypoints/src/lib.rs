//! Sweep ingestion and keypoint extraction for spinning multi-beam LiDAR.
//!
//! Provides:
//! - `SweepIngestor`: re-orders driver points into per-laser scan lines
//!   sorted by azimuth, with sweep-relative acquisition times
//! - `KeypointExtractor`: computes per-point geometric descriptors,
//!   invalidates unreliable points, and selects bounded sets of edge and
//!   planar keypoints per scan line

use thiserror::Error;

mod extractor;
mod sweep;

pub use extractor::{KeypointConfig, KeypointExtractor, Keypoints, LineDescriptors};
pub use sweep::{ScanLine, Sweep, SweepIngestor};

#[derive(Error, Debug)]
pub enum KeypointError {
    #[error("Neighbor width must be at least 1, got {0}")]
    InvalidNeighborWidth(usize),
    #[error("Invalid minimum sensor distance: {0}")]
    InvalidMinDistance(f64),
}
