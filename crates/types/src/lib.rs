//! Shared types and message definitions for lom.

use serde::{Deserialize, Serialize};

/// Classification assigned to a point by the keypoint extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Label {
    /// Not yet examined
    #[default]
    Unlabeled,
    /// Passed the edge threshold but was not selected (cap or suppression)
    EdgeCandidate,
    /// Selected as an edge keypoint
    Edge,
    /// Passed the planar threshold but was not selected (cap or suppression)
    PlanarCandidate,
    /// Selected as a planar keypoint
    Planar,
    /// Rejected by the occlusion / parallel-beam / margin filters
    Invalid,
}

impl Label {
    /// Whether a point with this label may still become a keypoint.
    pub fn selectable(&self) -> bool {
        !matches!(self, Label::Invalid)
    }
}

/// A single LiDAR return with the annotations the pipeline carries along.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate in sensor frame (forward)
    pub x: f64,
    /// Y coordinate in sensor frame (left)
    pub y: f64,
    /// Z coordinate in sensor frame (up)
    pub z: f64,
    /// Return intensity (0-255 scaled by the driver)
    pub intensity: f64,
    /// Laser (beam) index as reported by the driver
    pub laser_id: usize,
    /// Sweep-relative acquisition time: 0 at sweep start, 1 at sweep end
    pub time: f64,
    /// Pipeline label tag
    pub label: Label,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64, laser_id: usize) -> Self {
        Self {
            x,
            y,
            z,
            intensity: 0.0,
            laser_id,
            time: 0.0,
            label: Label::Unlabeled,
        }
    }

    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = intensity;
        self
    }

    /// Distance from the sensor origin.
    pub fn range(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Azimuth around the spin axis, in [0, 2*PI).
    pub fn azimuth(&self) -> f64 {
        let a = self.y.atan2(self.x);
        if a < 0.0 {
            a + 2.0 * std::f64::consts::PI
        } else {
            a
        }
    }

    /// Position as a coordinate triple.
    pub fn coords(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// True if any coordinate is NaN or infinite.
    pub fn is_degenerate(&self) -> bool {
        !(self.x.is_finite() && self.y.is_finite() && self.z.is_finite())
    }
}

/// One sweep's worth of points, in driver order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointCloud {
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Number of points carrying the given label.
    pub fn count_label(&self, label: Label) -> usize {
        self.points.iter().filter(|p| p.label == label).count()
    }
}

impl FromIterator<Point> for PointCloud {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

/// 6-DoF pose: ZYX-composed Euler rotation plus translation.
///
/// The rotation matrix is Rz(rz) * Ry(ry) * Rx(rx); translation is applied
/// after rotation. Angles in radians, translations in meters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Rotation about X (roll)
    pub rx: f64,
    /// Rotation about Y (pitch)
    pub ry: f64,
    /// Rotation about Z (yaw)
    pub rz: f64,
    /// Translation along X
    pub tx: f64,
    /// Translation along Y
    pub ty: f64,
    /// Translation along Z
    pub tz: f64,
}

impl Pose {
    pub fn new(rx: f64, ry: f64, rz: f64, tx: f64, ty: f64, tz: f64) -> Self {
        Self {
            rx,
            ry,
            rz,
            tx,
            ty,
            tz,
        }
    }

    pub fn as_array(&self) -> [f64; 6] {
        [self.rx, self.ry, self.rz, self.tx, self.ty, self.tz]
    }

    pub fn from_array(arr: [f64; 6]) -> Self {
        Self {
            rx: arr[0],
            ry: arr[1],
            rz: arr[2],
            tx: arr[3],
            ty: arr[4],
            tz: arr[5],
        }
    }

    /// Euclidean norm of the translation component.
    pub fn translation_norm(&self) -> f64 {
        (self.tx * self.tx + self.ty * self.ty + self.tz * self.tz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_range() {
        let p = Point::new(3.0, 4.0, 0.0, 0);
        assert!((p.range() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_point_azimuth_wraps() {
        let p = Point::new(1.0, -1e-9, 0.0, 0);
        let a = p.azimuth();
        assert!(a >= 0.0 && a < 2.0 * std::f64::consts::PI);

        let q = Point::new(0.0, -1.0, 0.0, 0);
        assert!((q.azimuth() - 1.5 * std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn test_point_degenerate() {
        let mut p = Point::new(1.0, 2.0, 3.0, 0);
        assert!(!p.is_degenerate());
        p.z = f64::NAN;
        assert!(p.is_degenerate());
    }

    #[test]
    fn test_label_selectable() {
        assert!(Label::Unlabeled.selectable());
        assert!(Label::EdgeCandidate.selectable());
        assert!(!Label::Invalid.selectable());
    }

    #[test]
    fn test_point_serde_roundtrip() {
        let p = Point {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            intensity: 42.0,
            laser_id: 7,
            time: 0.25,
            label: Label::Edge,
        };
        let json = serde_json::to_string(&p).unwrap();
        let decoded: Point = serde_json::from_str(&json).unwrap();
        assert!((decoded.x - p.x).abs() < 1e-12);
        assert_eq!(decoded.laser_id, 7);
        assert_eq!(decoded.label, Label::Edge);
    }

    #[test]
    fn test_pose_array_roundtrip() {
        let pose = Pose::new(0.1, -0.2, 0.3, 1.0, 2.0, -3.0);
        let arr = pose.as_array();
        let back = Pose::from_array(arr);
        assert!((back.rz - 0.3).abs() < 1e-12);
        assert!((back.tz + 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_pose_serde_roundtrip() {
        let pose = Pose::new(0.0, 0.0, std::f64::consts::PI / 4.0, 10.0, 0.0, 0.0);
        let json = serde_json::to_string(&pose).unwrap();
        let decoded: Pose = serde_json::from_str(&json).unwrap();
        assert!((decoded.rz - pose.rz).abs() < 1e-12);
        assert!((decoded.tx - pose.tx).abs() < 1e-12);
    }

    #[test]
    fn test_cloud_count_label() {
        let mut cloud = PointCloud::default();
        cloud.push(Point::new(1.0, 0.0, 0.0, 0));
        let mut p = Point::new(2.0, 0.0, 0.0, 0);
        p.label = Label::Invalid;
        cloud.push(p);
        assert_eq!(cloud.count_label(Label::Invalid), 1);
        assert_eq!(cloud.count_label(Label::Unlabeled), 1);
        assert_eq!(cloud.len(), 2);
    }

    #[test]
    fn test_pose_translation_norm() {
        let pose = Pose::new(0.0, 0.0, 0.0, 3.0, 0.0, 4.0);
        assert!((pose.translation_norm() - 5.0).abs() < 1e-12);
    }
}
