//! Common utilities for odometry stack integration tests.

use odometry::{LidarOdometry, SlamParams};
use sim::{SweepConfig, SweepSim, World};
use transforms::Transform3D;

/// Flat floor plus two perpendicular walls, sensor 1.5 m above the floor.
pub fn corner_world() -> World {
    World::open_corner(-1.5, 6.0, 6.0, 30.0)
}

/// Corner world with the forward wall pushed out so the sensor can travel
/// 10 m toward it.
pub fn travel_world() -> World {
    World::open_corner(-1.5, 15.0, 6.0, 40.0)
}

/// 3 x 3 x 20 m corridor along the X axis.
pub fn corridor_world() -> World {
    World::corridor(3.0, 3.0, 20.0)
}

/// Default parameters with the map query radius tightened; the test worlds
/// are small and the smaller radius keeps the mapping stage fast.
pub fn fast_params() -> SlamParams {
    let mut params = SlamParams::default();
    params.max_distance_for_icp_matching = 5.0;
    params
}

pub fn x_pose(x: f64) -> Transform3D {
    Transform3D::new(0.0, 0.0, 0.0, x, 0.0, 0.0)
}

pub fn yaw_pose(yaw_deg: f64) -> Transform3D {
    Transform3D::new(0.0, 0.0, yaw_deg.to_radians(), 0.0, 0.0, 0.0)
}

/// Feed one sweep per pose through a fresh estimator.
pub fn run_poses(world: &World, poses: &[Transform3D], params: SlamParams) -> LidarOdometry {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut sim = SweepSim::new(SweepConfig::low_res());
    let mut slam = LidarOdometry::new(params).expect("valid test parameters");
    for pose in poses {
        let cloud = sim.sweep(world, pose);
        slam.add_frame(&cloud).expect("add_frame must not fail");
    }
    slam
}
