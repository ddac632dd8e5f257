//! Synthetic spinning multi-beam LiDAR.
//!
//! Generates one point cloud per full rotation by ray-casting against the
//! simulated world. Points carry the laser index and are emitted in spin
//! order; the sweep-relative time falls out of the azimuth, exactly as a
//! real spinning sensor behaves.

use crate::world::World;
use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use transforms::{PoseInterpolator, Transform3D};
use types::{Point, PointCloud};

/// Configuration for the simulated sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Azimuth steps per rotation
    pub horizontal_rays: usize,
    /// Number of laser beams
    pub lasers: usize,
    /// Lowest beam elevation (radians, negative = down)
    pub vertical_min: f64,
    /// Highest beam elevation (radians)
    pub vertical_max: f64,
    /// Minimum detection range (meters)
    pub min_range: f32,
    /// Maximum detection range (meters)
    pub max_range: f32,
    /// Uniform range noise magnitude (meters); 0 disables
    pub range_noise: f32,
    /// Dropout probability (0.0 to 1.0)
    pub dropout_rate: f32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            horizontal_rays: 360,
            lasers: 8,
            vertical_min: (-25.0f64).to_radians(),
            vertical_max: 0.0,
            min_range: 0.3,
            max_range: 40.0,
            range_noise: 0.0,
            dropout_rate: 0.0,
        }
    }
}

impl SweepConfig {
    /// Lower-resolution config for faster tests.
    pub fn low_res() -> Self {
        Self {
            horizontal_rays: 180,
            lasers: 6,
            ..Default::default()
        }
    }

    /// Higher-resolution config for detailed runs.
    pub fn high_res() -> Self {
        Self {
            horizontal_rays: 720,
            lasers: 16,
            ..Default::default()
        }
    }
}

/// Simulated spinning LiDAR sensor.
pub struct SweepSim {
    config: SweepConfig,
    rng: StdRng,
}

impl SweepSim {
    pub fn new(config: SweepConfig) -> Self {
        Self::with_seed(config, 0)
    }

    pub fn with_seed(config: SweepConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Generate one sweep from a stationary sensor pose.
    pub fn sweep(&mut self, world: &World, pose: &Transform3D) -> PointCloud {
        self.sweep_moving(world, pose, pose)
    }

    /// Generate one sweep while the sensor moves from `start` to `end`
    /// across the rotation. Each return is expressed in the sensor frame at
    /// its acquisition instant, so the cloud carries real motion skew.
    pub fn sweep_moving(
        &mut self,
        world: &World,
        start: &Transform3D,
        end: &Transform3D,
    ) -> PointCloud {
        let interp = PoseInterpolator::new(start, end);
        let mut cloud = PointCloud::default();

        for h in 0..self.config.horizontal_rays {
            let t = h as f64 / self.config.horizontal_rays as f64;
            let pose_t = interp.at(t);
            let azimuth = t * 2.0 * PI;

            for v in 0..self.config.lasers {
                if self.config.dropout_rate > 0.0
                    && self.rng.r#gen::<f32>() < self.config.dropout_rate
                {
                    continue;
                }

                let frac = if self.config.lasers > 1 {
                    v as f64 / (self.config.lasers - 1) as f64
                } else {
                    0.5
                };
                let elevation = self.config.vertical_min
                    + frac * (self.config.vertical_max - self.config.vertical_min);

                let local_dir = Vector3::new(
                    azimuth.cos() * elevation.cos(),
                    azimuth.sin() * elevation.cos(),
                    elevation.sin(),
                );
                let world_dir = pose_t.rotation() * local_dir;
                let origin = pose_t.translation();

                let hit = world.ray_cast(
                    Point3::new(origin.x as f32, origin.y as f32, origin.z as f32),
                    Vector3::new(world_dir.x as f32, world_dir.y as f32, world_dir.z as f32),
                    self.config.max_range,
                );

                if let Some(distance) = hit {
                    let distance = if self.config.range_noise > 0.0 {
                        distance + self.rng.r#gen::<f32>() * self.config.range_noise
                    } else {
                        distance
                    };

                    if distance >= self.config.min_range && distance <= self.config.max_range {
                        let p = local_dir * distance as f64;
                        let intensity =
                            ((1.0 - distance / self.config.max_range) * 255.0) as f64;
                        cloud.push(
                            Point::new(p.x, p.y, p.z, v).with_intensity(intensity),
                        );
                    }
                }
            }
        }

        cloud
    }
}
