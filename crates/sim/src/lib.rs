//! Synthetic LiDAR simulation for development and testing.
//!
//! Provides:
//! - `World`: boxy environments (rooms, corridors, open corners) with
//!   parry3d ray-casting
//! - `SweepSim`: a spinning multi-beam LiDAR producing per-sweep point
//!   clouds, with optional noise, dropout, and intra-sweep motion

mod lidar;
mod world;

pub use lidar::{SweepConfig, SweepSim};
pub use world::{Aabb, Obstacle, World};
