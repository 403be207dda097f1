//! 6×6 covariance for relative-pose measurements.
//!
//! Component order is (roll, pitch, yaw, x, y, z): rotation block first,
//! translation block second. Off-diagonal terms are carried but most
//! measurement models in this engine produce diagonals.

use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};

/// Covariance over a 6-DoF relative pose, rotation block first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Covariance6 {
    /// Full 6×6 matrix.
    pub matrix: Matrix6<f64>,
}

impl Covariance6 {
    /// Build from an explicit matrix.
    pub fn new(matrix: Matrix6<f64>) -> Self {
        Self { matrix }
    }

    /// Diagonal covariance from per-axis standard deviations.
    pub fn from_sigmas(rot_sigma: f64, trans_sigma: f64) -> Self {
        let mut m = Matrix6::zeros();
        for i in 0..3 {
            m[(i, i)] = rot_sigma * rot_sigma;
        }
        for i in 3..6 {
            m[(i, i)] = trans_sigma * trans_sigma;
        }
        Self { matrix: m }
    }

    /// Diagonal covariance from six per-component standard deviations.
    pub fn from_sigma_vector(sigmas: Vector6<f64>) -> Self {
        let mut m = Matrix6::zeros();
        for i in 0..6 {
            m[(i, i)] = sigmas[i] * sigmas[i];
        }
        Self { matrix: m }
    }

    /// Diagonal covariance from precisions (inverse variances).
    ///
    /// A precision of zero means no information on that component; the
    /// corresponding variance is mapped to a very large value rather
    /// than infinity so the matrix stays invertible.
    pub fn from_precisions(rot_precision: f64, trans_precision: f64) -> Self {
        let var = |p: f64| if p > 0.0 { 1.0 / p } else { 1e12 };
        let mut m = Matrix6::zeros();
        for i in 0..3 {
            m[(i, i)] = var(rot_precision);
        }
        for i in 3..6 {
            m[(i, i)] = var(trans_precision);
        }
        Self { matrix: m }
    }

    /// Information matrix (inverse covariance).
    ///
    /// Falls back to a pseudo-inverse of the diagonal when the full
    /// inversion fails (rank-deficient off-diagonal input).
    pub fn information(&self) -> Matrix6<f64> {
        if let Some(inv) = self.matrix.try_inverse() {
            return inv;
        }
        let mut m = Matrix6::zeros();
        for i in 0..6 {
            let v = self.matrix[(i, i)];
            m[(i, i)] = if v > 0.0 { 1.0 / v } else { 0.0 };
        }
        m
    }

    /// Sum of two covariances (used when composing measurement chains).
    pub fn add(&self, other: &Covariance6) -> Covariance6 {
        Covariance6 {
            matrix: self.matrix + other.matrix,
        }
    }
}

impl Default for Covariance6 {
    fn default() -> Self {
        // 0.01 rad and 0.04 m standard deviations, matching the fixed
        // covariance applied to relayed odometry edges.
        Self::from_sigmas(0.01, 0.04)
    }
}
