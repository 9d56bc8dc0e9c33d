//! SE3: 6-DOF rigid transformation (rotation + translation).
//!
//! Poses are stored as a unit quaternion plus a translation vector and act on
//! points as `p' = R * p + t`.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid body transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Construct from a rotation matrix and translation.
    ///
    /// The matrix is assumed to be orthonormal with determinant +1.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Construct from an axis-angle rotation vector and translation.
    pub fn from_axis_angle(rotation_vec: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_scaled_axis(rotation_vec),
            translation,
        }
    }

    /// Construct from a homogeneous 4x4 matrix `[R | t; 0 | 1]`.
    pub fn from_matrix(mat: &Matrix4<f64>) -> Self {
        let rotation = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        Self::from_rt(rotation, translation)
    }

    /// Homogeneous 4x4 matrix `[R | t; 0 0 0 1]`.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Inverse transformation: `[R^T | -R^T t]`.
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transforms: `self ∘ other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Angle (radians) of the relative rotation between two poses.
    pub fn rotation_angle_to(&self, other: &SE3) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }

    /// Euclidean distance between the two translations.
    pub fn translation_distance_to(&self, other: &SE3) -> f64 {
        (self.translation - other.translation).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> SE3 {
        SE3::from_axis_angle(Vector3::new(0.1, -0.4, 0.25), Vector3::new(1.0, 2.0, -0.5))
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let pose = sample_pose();
        let id = pose.compose(&pose.inverse());

        assert_relative_eq!(id.translation, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(id.rotation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_roundtrip_preserves_point_mapping() {
        let pose = sample_pose();
        let back = SE3::from_matrix(&pose.to_matrix());
        let p = Vector3::new(0.3, -1.2, 4.0);

        assert_relative_eq!(back.transform_point(&p), pose.transform_point(&p), epsilon = 1e-10);
    }

    #[test]
    fn test_rotation_angle_between_poses() {
        let a = SE3::identity();
        let b = SE3::from_axis_angle(Vector3::new(0.0, 0.0, 0.3), Vector3::zeros());

        assert_relative_eq!(a.rotation_angle_to(&b), 0.3, epsilon = 1e-12);
        assert_relative_eq!(a.translation_distance_to(&b), 0.0);
    }
}
