//! Simulated boxy worlds for synthetic LiDAR sweeps.

use nalgebra::{Isometry3, Point3, Vector3};
use parry3d::query::{Ray, RayCast};
use parry3d::shape::{Cuboid, SharedShape};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    /// Check if a point is inside this AABB.
    pub fn contains(&self, point: &Point3<f32>) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

/// An obstacle in the world.
#[derive(Debug, Clone)]
pub struct Obstacle {
    /// Position (center) in world frame
    pub position: Isometry3<f32>,
    /// Shape for ray-casting
    pub shape: SharedShape,
    /// AABB for fast containment checks
    pub aabb: Aabb,
    /// Human-readable name (for debugging)
    pub name: String,
}

impl Obstacle {
    /// Create a box obstacle.
    pub fn box_obstacle(
        name: impl Into<String>,
        center: Point3<f32>,
        half_extents: Vector3<f32>,
    ) -> Self {
        let position = Isometry3::translation(center.x, center.y, center.z);
        let shape = SharedShape::new(Cuboid::new(half_extents));
        let aabb = Aabb::new(
            Point3::new(
                center.x - half_extents.x,
                center.y - half_extents.y,
                center.z - half_extents.z,
            ),
            Point3::new(
                center.x + half_extents.x,
                center.y + half_extents.y,
                center.z + half_extents.z,
            ),
        );

        Self {
            position,
            shape,
            aabb,
            name: name.into(),
        }
    }

    /// Create a vertical wall slab parallel to the Y axis at `x`.
    pub fn wall_x(name: impl Into<String>, x: f32, half_span: f32, z_min: f32, z_max: f32) -> Self {
        Self::box_obstacle(
            name,
            Point3::new(x, 0.0, (z_min + z_max) / 2.0),
            Vector3::new(0.1, half_span, (z_max - z_min) / 2.0),
        )
    }

    /// Create a vertical wall slab parallel to the X axis at `y`.
    pub fn wall_y(name: impl Into<String>, y: f32, half_span: f32, z_min: f32, z_max: f32) -> Self {
        Self::box_obstacle(
            name,
            Point3::new(0.0, y, (z_min + z_max) / 2.0),
            Vector3::new(half_span, 0.1, (z_max - z_min) / 2.0),
        )
    }

    /// Cast a ray against this obstacle, returning distance if hit.
    pub fn ray_cast(&self, ray: &Ray, max_toi: f32) -> Option<f32> {
        self.shape.cast_ray(&self.position, ray, max_toi, true)
    }
}

/// The simulated world containing all obstacles plus a ground plane.
#[derive(Debug, Clone, Default)]
pub struct World {
    /// All obstacles in the world
    pub obstacles: Vec<Obstacle>,
    /// Ground plane height
    pub ground_z: f32,
    /// Disable the infinite ground plane (fully enclosed worlds)
    pub no_ground: bool,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flat floor plus two perpendicular walls: one at `x = wall_x`, one at
    /// `y = wall_y`, both spanning `extent` to each side.
    pub fn open_corner(floor_z: f32, wall_x: f32, wall_y: f32, extent: f32) -> Self {
        let mut world = Self::new();
        world.ground_z = floor_z;
        world
            .obstacles
            .push(Obstacle::wall_x("wall_x", wall_x, extent, floor_z, floor_z + 5.0));
        world
            .obstacles
            .push(Obstacle::wall_y("wall_y", wall_y, extent, floor_z, floor_z + 5.0));
        world
    }

    /// Square room: floor plus 4 walls, sensor height in the middle of the
    /// walls.
    pub fn empty_room(size: f32, floor_z: f32, wall_height: f32) -> Self {
        let half = size / 2.0;
        let mut world = Self::new();
        world.ground_z = floor_z;
        let z_max = floor_z + wall_height;
        world
            .obstacles
            .push(Obstacle::wall_x("east_wall", half, half, floor_z, z_max));
        world
            .obstacles
            .push(Obstacle::wall_x("west_wall", -half, half, floor_z, z_max));
        world
            .obstacles
            .push(Obstacle::wall_y("north_wall", half, half, floor_z, z_max));
        world
            .obstacles
            .push(Obstacle::wall_y("south_wall", -half, half, floor_z, z_max));
        world
    }

    /// Corridor along the X axis, centered on the origin: side walls, end
    /// walls, floor and ceiling.
    pub fn corridor(width: f32, height: f32, length: f32) -> Self {
        let mut world = Self::new();
        world.ground_z = -height / 2.0;
        let z_min = -height / 2.0;
        let z_max = height / 2.0;

        world.obstacles.push(Obstacle::box_obstacle(
            "left_wall",
            Point3::new(0.0, width / 2.0, 0.0),
            Vector3::new(length / 2.0, 0.1, height / 2.0),
        ));
        world.obstacles.push(Obstacle::box_obstacle(
            "right_wall",
            Point3::new(0.0, -width / 2.0, 0.0),
            Vector3::new(length / 2.0, 0.1, height / 2.0),
        ));
        world
            .obstacles
            .push(Obstacle::wall_x("far_end", length / 2.0, width / 2.0, z_min, z_max));
        world
            .obstacles
            .push(Obstacle::wall_x("near_end", -length / 2.0, width / 2.0, z_min, z_max));
        world.obstacles.push(Obstacle::box_obstacle(
            "ceiling",
            Point3::new(0.0, 0.0, z_max + 0.1),
            Vector3::new(length / 2.0, width / 2.0, 0.1),
        ));
        world
    }

    /// Add an obstacle to the world.
    pub fn add_obstacle(&mut self, obstacle: Obstacle) {
        self.obstacles.push(obstacle);
    }

    /// Check if a point is inside any obstacle.
    pub fn point_collides(&self, point: &Point3<f32>) -> bool {
        self.obstacles.iter().any(|o| o.aabb.contains(point))
    }

    /// Cast a ray and return the closest hit distance.
    pub fn ray_cast(
        &self,
        origin: Point3<f32>,
        direction: Vector3<f32>,
        max_range: f32,
    ) -> Option<f32> {
        let ray = Ray::new(origin, direction);
        let mut closest: Option<f32> = None;

        // Ground plane
        if !self.no_ground && direction.z < -0.001 {
            let t = (self.ground_z - origin.z) / direction.z;
            if t > 0.0 && t < max_range {
                closest = Some(t);
            }
        }

        for obs in &self.obstacles {
            if let Some(t) = obs.ray_cast(&ray, max_range) {
                if t > 0.0 {
                    closest = Some(closest.map_or(t, |c| c.min(t)));
                }
            }
        }

        closest
    }
}
