//! 3-D rigid transform handling for LiDAR odometry.
//!
//! Provides:
//! - `Transform3D`, a rigid body transform over `nalgebra::Isometry3`
//! - ZYX Euler pose conversions and the analytic rotation derivatives
//!   used by the Levenberg-Marquardt solver
//! - `PoseInterpolator`, the time-parameterized motion model used for
//!   per-point undistortion across a sweep
//!
//! Pose convention: a 6-tuple (rx, ry, rz, tx, ty, tz) whose rotation
//! matrix is Rz(rz) * Ry(ry) * Rx(rx).

use nalgebra::{
    Isometry3, Matrix3, Point3, Translation3, UnitQuaternion, Vector3,
};
use std::f64::consts::PI;
use types::Pose;

/// A 3-D rigid body transform (rotation + translation).
#[derive(Debug, Clone, Copy)]
pub struct Transform3D {
    inner: Isometry3<f64>,
}

impl Transform3D {
    /// Create identity transform.
    pub fn identity() -> Self {
        Self {
            inner: Isometry3::identity(),
        }
    }

    /// Create from ZYX Euler angles and a translation.
    pub fn new(rx: f64, ry: f64, rz: f64, tx: f64, ty: f64, tz: f64) -> Self {
        Self {
            inner: Isometry3::from_parts(
                Translation3::new(tx, ty, tz),
                UnitQuaternion::from_euler_angles(rx, ry, rz),
            ),
        }
    }

    /// Create from a Pose struct.
    pub fn from_pose(pose: &Pose) -> Self {
        Self::new(pose.rx, pose.ry, pose.rz, pose.tx, pose.ty, pose.tz)
    }

    /// Convert to a Pose struct.
    pub fn to_pose(&self) -> Pose {
        let (rx, ry, rz) = self.inner.rotation.euler_angles();
        let t = self.inner.translation.vector;
        Pose::new(rx, ry, rz, t.x, t.y, t.z)
    }

    /// Get the underlying nalgebra Isometry3.
    pub fn as_isometry(&self) -> &Isometry3<f64> {
        &self.inner
    }

    /// Create from nalgebra Isometry3.
    pub fn from_isometry(iso: Isometry3<f64>) -> Self {
        Self { inner: iso }
    }

    /// Get translation component.
    pub fn translation(&self) -> Vector3<f64> {
        self.inner.translation.vector
    }

    /// Get rotation component.
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.inner.rotation
    }

    /// Rotation as a 3x3 matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.inner.rotation.to_rotation_matrix().into_inner()
    }

    /// Compute inverse transform.
    pub fn inverse(&self) -> Self {
        Self {
            inner: self.inner.inverse(),
        }
    }

    /// Compose transforms: self * other.
    /// If self is A->B and other is B->C, result is A->C.
    pub fn compose(&self, other: &Transform3D) -> Transform3D {
        Transform3D {
            inner: self.inner * other.inner,
        }
    }

    /// Transform a point from child frame to parent frame.
    pub fn transform_point(&self, point: Vector3<f64>) -> Vector3<f64> {
        self.inner.transform_point(&Point3::from(point)).coords
    }

    /// Compute relative transform: from self to other.
    /// If self is A and other is B (both in same frame), returns A->B.
    pub fn relative_to(&self, other: &Transform3D) -> Transform3D {
        Transform3D {
            inner: self.inner.inverse() * other.inner,
        }
    }

    /// Angle of the rotation component, in radians.
    pub fn rotation_angle(&self) -> f64 {
        self.inner.rotation.angle()
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform3D {
    type Output = Transform3D;

    fn mul(self, rhs: Transform3D) -> Transform3D {
        self.compose(&rhs)
    }
}

impl std::ops::Mul<&Transform3D> for Transform3D {
    type Output = Transform3D;

    fn mul(self, rhs: &Transform3D) -> Transform3D {
        self.compose(rhs)
    }
}

impl std::ops::Mul<Transform3D> for &Transform3D {
    type Output = Transform3D;

    fn mul(self, rhs: Transform3D) -> Transform3D {
        self.compose(&rhs)
    }
}

impl std::ops::Mul<&Transform3D> for &Transform3D {
    type Output = Transform3D;

    fn mul(self, rhs: &Transform3D) -> Transform3D {
        self.compose(rhs)
    }
}

/// Rotation matrix for ZYX Euler angles: Rz(rz) * Ry(ry) * Rx(rx).
pub fn rotation_zyx(rx: f64, ry: f64, rz: f64) -> Matrix3<f64> {
    UnitQuaternion::from_euler_angles(rx, ry, rz)
        .to_rotation_matrix()
        .into_inner()
}

/// Partial derivatives of the ZYX rotation matrix with respect to
/// (rx, ry, rz), in that order.
///
/// With R = Rz * Ry * Rx:
///   dR/drx = Rz * Ry * dRx,  dR/dry = Rz * dRy * Rx,  dR/drz = dRz * Ry * Rx
pub fn rotation_zyx_partials(rx: f64, ry: f64, rz: f64) -> [Matrix3<f64>; 3] {
    let (sx, cx) = rx.sin_cos();
    let (sy, cy) = ry.sin_cos();
    let (sz, cz) = rz.sin_cos();

    let r_x = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, -sx, 0.0, sx, cx);
    let r_y = Matrix3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
    let r_z = Matrix3::new(cz, -sz, 0.0, sz, cz, 0.0, 0.0, 0.0, 1.0);

    let d_x = Matrix3::new(0.0, 0.0, 0.0, 0.0, -sx, -cx, 0.0, cx, -sx);
    let d_y = Matrix3::new(-sy, 0.0, cy, 0.0, 0.0, 0.0, -cy, 0.0, -sy);
    let d_z = Matrix3::new(-sz, -cz, 0.0, cz, -sz, 0.0, 0.0, 0.0, 0.0);

    [r_z * r_y * d_x, r_z * d_y * r_x, d_z * r_y * r_x]
}

/// Rigid-motion interpolator over sweep-relative time t in [0, 1].
///
/// Rotation is interpolated by quaternion SLERP, translation linearly.
/// Used to compensate sensor motion across a sweep: for ego-motion it spans
/// identity -> Trelative, for mapping Tworld_prev -> Tworld.
#[derive(Debug, Clone)]
pub struct PoseInterpolator {
    rot_start: UnitQuaternion<f64>,
    rot_end: UnitQuaternion<f64>,
    trans_start: Vector3<f64>,
    trans_end: Vector3<f64>,
}

impl PoseInterpolator {
    /// Build an interpolator between two transforms.
    pub fn new(start: &Transform3D, end: &Transform3D) -> Self {
        Self {
            rot_start: start.rotation(),
            rot_end: end.rotation(),
            trans_start: start.translation(),
            trans_end: end.translation(),
        }
    }

    /// Interpolator spanning identity -> end.
    pub fn from_identity(end: &Transform3D) -> Self {
        Self::new(&Transform3D::identity(), end)
    }

    /// Pose at time t. Values outside [0, 1] are clamped.
    pub fn at(&self, t: f64) -> Transform3D {
        let t = t.clamp(0.0, 1.0);
        let rot = self
            .rot_start
            .try_slerp(&self.rot_end, t, 1e-12)
            .unwrap_or(if t < 0.5 { self.rot_start } else { self.rot_end });
        let trans = self.trans_start.lerp(&self.trans_end, t);
        Transform3D::from_isometry(Isometry3::from_parts(Translation3::from(trans), rot))
    }
}

/// Normalize angle to [-PI, PI).
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a >= PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_identity() {
        let tf = Transform3D::identity();
        assert_relative_eq!(tf.translation().norm(), 0.0);
        assert_relative_eq!(tf.rotation_angle(), 0.0);
    }

    #[test]
    fn test_pose_roundtrip() {
        let pose = Pose::new(0.1, -0.2, 0.3, 1.0, 2.0, 3.0);
        let tf = Transform3D::from_pose(&pose);
        let back = tf.to_pose();
        assert_relative_eq!(back.rx, pose.rx, epsilon = 1e-10);
        assert_relative_eq!(back.ry, pose.ry, epsilon = 1e-10);
        assert_relative_eq!(back.rz, pose.rz, epsilon = 1e-10);
        assert_relative_eq!(back.tx, pose.tx, epsilon = 1e-10);
    }

    #[test]
    fn test_zyx_composition_order() {
        // Rotation about Z only should leave Z axis fixed and rotate X into Y.
        let tf = Transform3D::new(0.0, 0.0, PI / 2.0, 0.0, 0.0, 0.0);
        let p = tf.transform_point(Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);

        // Full ZYX: matrix must equal Rz * Ry * Rx.
        let (rx, ry, rz) = (0.3, -0.5, 1.1);
        let expected = rotation_zyx(0.0, 0.0, rz) * rotation_zyx(0.0, ry, 0.0) * rotation_zyx(rx, 0.0, 0.0);
        let got = rotation_zyx(rx, ry, rz);
        assert_relative_eq!((expected - got).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_transform_inverse() {
        let tf = Transform3D::new(0.2, 0.1, -0.4, 1.0, -2.0, 0.5);
        let composed = tf.compose(&tf.inverse());
        assert_relative_eq!(composed.translation().norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(composed.rotation_angle(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_relative_to() {
        let a = Transform3D::new(0.0, 0.0, 0.1, 1.0, 0.0, 0.0);
        let b = Transform3D::new(0.0, 0.0, 0.3, 2.0, 1.0, 0.0);
        let rel = a.relative_to(&b);
        let back = a.compose(&rel);
        assert_relative_eq!((back.translation() - b.translation()).norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(back.rotation_angle(), b.rotation_angle(), epsilon = 1e-10);
    }

    #[test]
    fn test_rotation_partials_against_finite_differences() {
        let (rx, ry, rz) = (0.21, -0.37, 0.93);
        let h = 1e-7;
        let partials = rotation_zyx_partials(rx, ry, rz);

        let numeric = [
            (rotation_zyx(rx + h, ry, rz) - rotation_zyx(rx - h, ry, rz)) / (2.0 * h),
            (rotation_zyx(rx, ry + h, rz) - rotation_zyx(rx, ry - h, rz)) / (2.0 * h),
            (rotation_zyx(rx, ry, rz + h) - rotation_zyx(rx, ry, rz - h)) / (2.0 * h),
        ];

        for (analytic, num) in partials.iter().zip(numeric.iter()) {
            assert_relative_eq!((analytic - num).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_interpolator_endpoints() {
        let end = Transform3D::new(0.0, 0.0, 0.4, 2.0, 0.0, 0.0);
        let interp = PoseInterpolator::from_identity(&end);

        let at0 = interp.at(0.0);
        assert_relative_eq!(at0.translation().norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(at0.rotation_angle(), 0.0, epsilon = 1e-12);

        let at1 = interp.at(1.0);
        assert_relative_eq!(at1.translation().x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(at1.rotation_angle(), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_interpolator_midpoint() {
        let end = Transform3D::new(0.0, 0.0, 0.2, 1.0, 0.0, 0.0);
        let interp = PoseInterpolator::from_identity(&end);
        let mid = interp.at(0.5);
        assert_relative_eq!(mid.translation().x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(mid.rotation_angle(), 0.1, epsilon = 1e-10);
    }

    #[test]
    fn test_interpolator_clamps() {
        let end = Transform3D::new(0.0, 0.0, 0.0, 1.0, 0.0, 0.0);
        let interp = PoseInterpolator::from_identity(&end);
        assert_relative_eq!(interp.at(-0.5).translation().x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(interp.at(1.5).translation().x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_angle() {
        assert_relative_eq!(normalize_angle(0.0), 0.0, epsilon = 1e-10);
        assert_relative_eq!(normalize_angle(2.0 * PI), 0.0, epsilon = 1e-10);
        assert_relative_eq!(normalize_angle(3.0 * PI).abs(), PI, epsilon = 1e-10);
        assert_relative_eq!(normalize_angle(-3.0 * PI), -PI, epsilon = 1e-10);
    }
}
