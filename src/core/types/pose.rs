//! 6-DoF rigid transforms.
//!
//! `Pose3D` is the world-frame pose of a node or the relative measurement
//! carried by an edge. It wraps an `Isometry3<f64>` and exposes the
//! compose/inverse/between algebra the rest of the engine is written in.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A rigid transform in 3-D: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose3D {
    /// Underlying isometry (unit quaternion + translation).
    pub isometry: Isometry3<f64>,
}

impl Pose3D {
    /// Identity transform.
    #[inline]
    pub fn identity() -> Self {
        Self {
            isometry: Isometry3::identity(),
        }
    }

    /// Build from a translation vector and a unit quaternion.
    #[inline]
    pub fn from_parts(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            isometry: Isometry3::from_parts(Translation3::from(translation), rotation),
        }
    }

    /// Pure translation.
    #[inline]
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self::from_parts(Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    /// Build from translation and roll/pitch/yaw Euler angles.
    #[inline]
    pub fn from_xyz_rpy(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::from_parts(
            Vector3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }

    /// Translation component.
    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.isometry.translation.vector
    }

    /// Rotation component.
    #[inline]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.isometry.rotation
    }

    /// Compose: `self ∘ other` (apply `other` in this pose's frame).
    #[inline]
    pub fn compose(&self, other: &Pose3D) -> Pose3D {
        Pose3D {
            isometry: self.isometry * other.isometry,
        }
    }

    /// Inverse transform.
    #[inline]
    pub fn inverse(&self) -> Pose3D {
        Pose3D {
            isometry: self.isometry.inverse(),
        }
    }

    /// Relative transform from `self` to `other`: `self⁻¹ ∘ other`.
    #[inline]
    pub fn between(&self, other: &Pose3D) -> Pose3D {
        Pose3D {
            isometry: self.isometry.inverse() * other.isometry,
        }
    }

    /// Transform a point from this pose's frame into the world frame.
    #[inline]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.isometry.rotation * p + self.isometry.translation.vector
    }

    /// Euclidean norm of the translation component.
    #[inline]
    pub fn translation_norm(&self) -> f64 {
        self.isometry.translation.vector.norm()
    }

    /// Rotation angle in radians (`2·acos(|qw|)`, in `[0, π]`).
    #[inline]
    pub fn rotation_angle(&self) -> f64 {
        self.isometry.rotation.angle()
    }

    /// Euclidean distance between the translations of two poses.
    #[inline]
    pub fn translation_distance(&self, other: &Pose3D) -> f64 {
        (self.translation() - other.translation()).norm()
    }
}

impl Default for Pose3D {
    fn default() -> Self {
        Self::identity()
    }
}
