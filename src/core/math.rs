//! SE(3) tangent-space helpers for the graph optimizer.
//!
//! The optimizer parameterizes each node by a 6-vector local update
//! `[δφ; δt]` (rotation block first) applied on the right:
//! `X ← X ∘ (Exp(δφ), δt)`. The decoupled log/exp pair below maps
//! between poses and that tangent ordering.

use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};

use super::types::Pose3D;

/// Skew-symmetric matrix of a 3-vector: `[v]×`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Decoupled logarithm of a pose: `[rotation vector; translation]`.
///
/// Exact on SO(3) (via the quaternion scaled axis); the translation
/// block is taken directly rather than through the SE(3) V-matrix,
/// which is the standard small-error simplification for pose-graph
/// residuals.
#[inline]
pub fn log_decoupled(pose: &Pose3D) -> Vector6<f64> {
    let phi = pose.rotation().scaled_axis();
    let t = pose.translation();
    Vector6::new(phi.x, phi.y, phi.z, t.x, t.y, t.z)
}

/// Decoupled exponential: inverse of [`log_decoupled`].
#[inline]
pub fn exp_decoupled(xi: &Vector6<f64>) -> Pose3D {
    let phi = Vector3::new(xi[0], xi[1], xi[2]);
    let t = Vector3::new(xi[3], xi[4], xi[5]);
    Pose3D::from_parts(t, nalgebra::UnitQuaternion::from_scaled_axis(phi))
}

/// Apply a right-multiplicative tangent update to a pose.
///
/// Rotation: `R ← R·Exp(δφ)`. Translation: `t ← t + R·δt` (the update
/// is expressed in the body frame).
pub fn retract(pose: &Pose3D, xi: &Vector6<f64>) -> Pose3D {
    let dphi = Vector3::new(xi[0], xi[1], xi[2]);
    let dt = Vector3::new(xi[3], xi[4], xi[5]);
    let r = pose.rotation() * nalgebra::UnitQuaternion::from_scaled_axis(dphi);
    let t = pose.translation() + pose.rotation() * dt;
    Pose3D::from_parts(t, r)
}

/// SE(3) adjoint in `[rot; trans]` block ordering:
///
/// ```text
/// Ad(T) = | R        0 |
///         | [t]× R   R |
/// ```
pub fn adjoint(pose: &Pose3D) -> Matrix6<f64> {
    let r = pose.rotation().to_rotation_matrix().into_inner();
    let t_skew_r = skew(&pose.translation()) * r;
    let mut ad = Matrix6::zeros();
    ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    ad.fixed_view_mut::<3, 3>(3, 0).copy_from(&t_skew_r);
    ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
    ad
}

/// Mahalanobis norm `sqrt(eᵀ Ω e)` of a 6-vector residual.
#[inline]
pub fn mahalanobis_norm(e: &Vector6<f64>, information: &Matrix6<f64>) -> f64 {
    (e.transpose() * information * e)[(0, 0)].max(0.0).sqrt()
}
