//! Nonlinear least-squares over SE(3).
//!
//! Minimizes the weighted squared error of all factors:
//!
//! ```text
//! F(x) = Σ e_k(x)ᵀ Ω_k e_k(x)
//! ```
//!
//! by iterating `H Δx = -g` with Levenberg-Marquardt damping. Each node
//! contributes a 6-DoF block `[δφ; δt]` applied as a right-multiplicative
//! update; the linear system is dense and solved by Cholesky, which is
//! adequate at the graph sizes a single deployment produces.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector, Matrix3, Matrix6, Vector3, Vector6};

use crate::core::math::{log_decoupled, retract, skew};
use crate::core::types::{Key, Pose3D};
use crate::graph::{EdgePayload, GraphEdge};

/// Result of one optimization pass.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Number of iterations performed.
    pub iterations: u32,
    /// Chi-squared error before the pass.
    pub initial_error: f64,
    /// Chi-squared error after the pass.
    pub final_error: f64,
    /// Whether the pass converged.
    pub converged: bool,
    /// Why the pass stopped.
    pub termination_reason: TerminationReason,
}

/// Why an optimization pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Relative error change fell below the threshold.
    Converged,
    /// Iteration cap reached.
    MaxIterations,
    /// Error kept increasing even with maximum damping.
    Diverged,
    /// The damped normal equations were not positive definite.
    SolveFailed,
    /// Nothing to optimize.
    NoFactors,
}

/// Gauss-Newton / Levenberg-Marquardt settings.
#[derive(Debug, Clone)]
pub struct GaussNewtonConfig {
    /// Iteration cap.
    pub max_iterations: u32,
    /// Convergence threshold on the relative error change.
    pub convergence_threshold: f64,
    /// Initial LM damping factor.
    pub damping_factor: f64,
}

impl Default for GaussNewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_threshold: 1e-9,
            damping_factor: 1e-6,
        }
    }
}

/// Chi-squared error of a factor set at the given values.
pub fn total_error(factors: &[GraphEdge], values: &BTreeMap<Key, Pose3D>) -> f64 {
    factors
        .iter()
        .map(|f| factor_error(f, values).unwrap_or(0.0))
        .sum()
}

/// Chi-squared contribution of one factor, `None` when an endpoint is
/// missing from the values.
fn factor_error(factor: &GraphEdge, values: &BTreeMap<Key, Pose3D>) -> Option<f64> {
    match &factor.payload {
        EdgePayload::Between { delta, covariance } => {
            let xi = values.get(&factor.from)?;
            let xj = values.get(&factor.to)?;
            let e = between_residual(xi, xj, delta);
            Some((e.transpose() * covariance.information() * e)[(0, 0)])
        }
        EdgePayload::Prior { pose, covariance } => {
            let x = values.get(&factor.from)?;
            let e = log_decoupled(&pose.between(x));
            Some((e.transpose() * covariance.information() * e)[(0, 0)])
        }
        EdgePayload::Range { range, variance } => {
            let xi = values.get(&factor.from)?;
            let xu = values.get(&factor.to)?;
            let e = xi.translation_distance(xu) - range;
            let w = if *variance > 0.0 { 1.0 / variance } else { 0.0 };
            Some(e * e * w)
        }
        EdgePayload::Attitude { direction, sigma } => {
            let x = values.get(&factor.from)?;
            let e = attitude_residual(x, direction);
            let w = if *sigma > 0.0 { 1.0 / (sigma * sigma) } else { 0.0 };
            Some(e.norm_squared() * w)
        }
    }
}

/// `e = Log(Z⁻¹ · Xi⁻¹ · Xj)`, rotation block first.
#[inline]
fn between_residual(xi: &Pose3D, xj: &Pose3D, z: &Pose3D) -> Vector6<f64> {
    log_decoupled(&z.inverse().compose(&xi.between(xj)))
}

/// Gravity-direction residual: predicted body-frame direction minus
/// measured.
#[inline]
fn attitude_residual(x: &Pose3D, measured: &[f64; 3]) -> Vector3<f64> {
    let predicted = x.rotation().inverse() * Vector3::new(0.0, 0.0, 1.0);
    predicted - Vector3::new(measured[0], measured[1], measured[2])
}

/// One optimization pass over `values` in place.
pub fn optimize(
    factors: &[GraphEdge],
    values: &mut BTreeMap<Key, Pose3D>,
    config: &GaussNewtonConfig,
) -> OptimizationResult {
    if factors.is_empty() || values.is_empty() {
        return OptimizationResult {
            iterations: 0,
            initial_error: 0.0,
            final_error: 0.0,
            converged: true,
            termination_reason: TerminationReason::NoFactors,
        };
    }

    // Stable variable ordering: key order.
    let index: BTreeMap<Key, usize> = values
        .keys()
        .enumerate()
        .map(|(i, k)| (*k, i))
        .collect();
    let dim = index.len() * 6;

    let initial_error = total_error(factors, values);
    let mut current_error = initial_error;
    let mut lambda = config.damping_factor;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let (mut h, g) = build_linear_system(factors, values, &index, dim);

        // LM damping on the diagonal.
        for i in 0..dim {
            let d = h[(i, i)];
            h[(i, i)] = d + lambda * d.max(1.0);
        }

        let delta = match nalgebra::Cholesky::new(h) {
            Some(chol) => chol.solve(&(-g)),
            None => {
                return OptimizationResult {
                    iterations,
                    initial_error,
                    final_error: current_error,
                    converged: false,
                    termination_reason: TerminationReason::SolveFailed,
                };
            }
        };

        let backup = values.clone();
        apply_update(values, &index, &delta);
        let new_error = total_error(factors, values);

        if new_error > current_error * (1.0 + 1e-9) {
            // Revert and raise damping.
            *values = backup;
            lambda *= 10.0;
            if lambda > 1e10 {
                return OptimizationResult {
                    iterations,
                    initial_error,
                    final_error: current_error,
                    converged: false,
                    termination_reason: TerminationReason::Diverged,
                };
            }
            continue;
        }

        lambda = (lambda * 0.1).max(1e-12);

        let relative_change = (current_error - new_error).abs() / current_error.max(1e-12);
        current_error = new_error;
        if relative_change < config.convergence_threshold {
            return OptimizationResult {
                iterations,
                initial_error,
                final_error: current_error,
                converged: true,
                termination_reason: TerminationReason::Converged,
            };
        }
    }

    OptimizationResult {
        iterations,
        initial_error,
        final_error: current_error,
        converged: false,
        termination_reason: TerminationReason::MaxIterations,
    }
}

/// Accumulate the dense normal equations `(H, g)` with
/// `g = Σ Jᵀ Ω e`.
fn build_linear_system(
    factors: &[GraphEdge],
    values: &BTreeMap<Key, Pose3D>,
    index: &BTreeMap<Key, usize>,
    dim: usize,
) -> (DMatrix<f64>, DVector<f64>) {
    let mut h = DMatrix::zeros(dim, dim);
    let mut g = DVector::zeros(dim);

    for factor in factors {
        match &factor.payload {
            EdgePayload::Between { delta, covariance } => {
                let (Some(&bi), Some(&bj)) = (index.get(&factor.from), index.get(&factor.to))
                else {
                    continue;
                };
                let xi = values[&factor.from];
                let xj = values[&factor.to];
                let e = between_residual(&xi, &xj, delta);
                let omega = covariance.information();
                let (ji, jj) = between_jacobians(&xi, &xj, delta);
                add_block_pair(&mut h, &mut g, bi * 6, bj * 6, &ji, &jj, &omega, &e);
            }
            EdgePayload::Prior { pose, covariance } => {
                let Some(&bi) = index.get(&factor.from) else {
                    continue;
                };
                let x = values[&factor.from];
                let e = log_decoupled(&pose.between(&x));
                let omega = covariance.information();
                let j = Matrix6::identity();
                add_block_single(&mut h, &mut g, bi * 6, &j, &omega, &e);
            }
            EdgePayload::Range { range, variance } => {
                let (Some(&bi), Some(&bj)) = (index.get(&factor.from), index.get(&factor.to))
                else {
                    continue;
                };
                let xi = values[&factor.from];
                let xu = values[&factor.to];
                let d = xu.translation() - xi.translation();
                let norm = d.norm();
                if norm < 1e-9 {
                    continue;
                }
                let u = d / norm;
                let e = norm - range;
                let w = if *variance > 0.0 { 1.0 / variance } else { 0.0 };
                // Body-frame translation rows of the two poses.
                let ri = xi.rotation().to_rotation_matrix().into_inner();
                let ru = xu.rotation().to_rotation_matrix().into_inner();
                let ji_t = -(u.transpose() * ri);
                let ju_t = u.transpose() * ru;
                let mut row = DVector::zeros(dim);
                for c in 0..3 {
                    row[bi * 6 + 3 + c] = ji_t[(0, c)];
                    row[bj * 6 + 3 + c] = ju_t[(0, c)];
                }
                // Rank-one update: H += w·rowᵀrow, g += w·e·row.
                for a in 0..3 {
                    for b in 0..3 {
                        h[(bi * 6 + 3 + a, bi * 6 + 3 + b)] +=
                            w * row[bi * 6 + 3 + a] * row[bi * 6 + 3 + b];
                        h[(bi * 6 + 3 + a, bj * 6 + 3 + b)] +=
                            w * row[bi * 6 + 3 + a] * row[bj * 6 + 3 + b];
                        h[(bj * 6 + 3 + a, bi * 6 + 3 + b)] +=
                            w * row[bj * 6 + 3 + a] * row[bi * 6 + 3 + b];
                        h[(bj * 6 + 3 + a, bj * 6 + 3 + b)] +=
                            w * row[bj * 6 + 3 + a] * row[bj * 6 + 3 + b];
                    }
                    g[bi * 6 + 3 + a] += w * e * row[bi * 6 + 3 + a];
                    g[bj * 6 + 3 + a] += w * e * row[bj * 6 + 3 + a];
                }
            }
            EdgePayload::Attitude { direction, sigma } => {
                let Some(&bi) = index.get(&factor.from) else {
                    continue;
                };
                let x = values[&factor.from];
                let e = attitude_residual(&x, direction);
                let w = if *sigma > 0.0 { 1.0 / (sigma * sigma) } else { 0.0 };
                // ∂(RᵀE₃)/∂δφ = [Rᵀe₃]× for a right perturbation.
                let v = x.rotation().inverse() * Vector3::new(0.0, 0.0, 1.0);
                let j = skew(&v);
                let ht = j.transpose() * j * w;
                let gt = j.transpose() * e * w;
                for a in 0..3 {
                    for b in 0..3 {
                        h[(bi * 6 + a, bi * 6 + b)] += ht[(a, b)];
                    }
                    g[bi * 6 + a] += gt[a];
                }
            }
        }
    }

    (h, g)
}

/// First-order Jacobians of the between residual with respect to the
/// right-perturbed endpoints.
fn between_jacobians(
    xi: &Pose3D,
    xj: &Pose3D,
    z: &Pose3D,
) -> (Matrix6<f64>, Matrix6<f64>) {
    let rz_t = z
        .rotation()
        .inverse()
        .to_rotation_matrix()
        .into_inner();
    let t_rel = xi.between(xj).translation();

    // J wrt the later endpoint is identity to first order.
    let jj = Matrix6::identity();

    let mut ji = Matrix6::zeros();
    let rot_rot: Matrix3<f64> = -rz_t;
    let trans_rot: Matrix3<f64> = rz_t * skew(&t_rel);
    let trans_trans: Matrix3<f64> = -rz_t;
    ji.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot_rot);
    ji.fixed_view_mut::<3, 3>(3, 0).copy_from(&trans_rot);
    ji.fixed_view_mut::<3, 3>(3, 3).copy_from(&trans_trans);

    (ji, jj)
}

/// Add a two-block factor contribution to `(H, g)`.
fn add_block_pair(
    h: &mut DMatrix<f64>,
    g: &mut DVector<f64>,
    base_i: usize,
    base_j: usize,
    ji: &Matrix6<f64>,
    jj: &Matrix6<f64>,
    omega: &Matrix6<f64>,
    e: &Vector6<f64>,
) {
    let omega_ji = omega * ji;
    let omega_jj = omega * jj;
    let h_ii = ji.transpose() * omega_ji;
    let h_ij = ji.transpose() * omega_jj;
    let h_jj = jj.transpose() * omega_jj;
    let g_i = ji.transpose() * omega * e;
    let g_j = jj.transpose() * omega * e;

    for r in 0..6 {
        for c in 0..6 {
            h[(base_i + r, base_i + c)] += h_ii[(r, c)];
            h[(base_i + r, base_j + c)] += h_ij[(r, c)];
            h[(base_j + r, base_i + c)] += h_ij[(c, r)];
            h[(base_j + r, base_j + c)] += h_jj[(r, c)];
        }
        g[base_i + r] += g_i[r];
        g[base_j + r] += g_j[r];
    }
}

/// Add a unary factor contribution to `(H, g)`.
fn add_block_single(
    h: &mut DMatrix<f64>,
    g: &mut DVector<f64>,
    base: usize,
    j: &Matrix6<f64>,
    omega: &Matrix6<f64>,
    e: &Vector6<f64>,
) {
    let hb = j.transpose() * omega * j;
    let gb = j.transpose() * omega * e;
    for r in 0..6 {
        for c in 0..6 {
            h[(base + r, base + c)] += hb[(r, c)];
        }
        g[base + r] += gb[r];
    }
}

/// Retract the solved update onto every node.
fn apply_update(
    values: &mut BTreeMap<Key, Pose3D>,
    index: &BTreeMap<Key, usize>,
    delta: &DVector<f64>,
) {
    for (key, &i) in index {
        let xi = Vector6::new(
            delta[i * 6],
            delta[i * 6 + 1],
            delta[i * 6 + 2],
            delta[i * 6 + 3],
            delta[i * 6 + 4],
            delta[i * 6 + 5],
        );
        if let Some(pose) = values.get_mut(key) {
            *pose = retract(pose, &xi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Covariance6;
    use approx::assert_relative_eq;

    fn key(i: u64) -> Key {
        Key::new(b'a', i)
    }

    fn pose_x(x: f64) -> Pose3D {
        Pose3D::from_translation(x, 0.0, 0.0)
    }

    fn tight() -> Covariance6 {
        Covariance6::from_sigmas(0.001, 0.001)
    }

    fn loose() -> Covariance6 {
        Covariance6::from_sigmas(0.01, 0.1)
    }

    #[test]
    fn test_empty_problem() {
        let mut values = BTreeMap::new();
        let result = optimize(&[], &mut values, &GaussNewtonConfig::default());
        assert!(result.converged);
        assert_eq!(result.termination_reason, TerminationReason::NoFactors);
    }

    #[test]
    fn test_perfect_chain_has_zero_error() {
        let values: BTreeMap<Key, Pose3D> =
            [(key(0), pose_x(0.0)), (key(1), pose_x(1.0))].into_iter().collect();
        let factors = vec![
            GraphEdge::prior(key(0), pose_x(0.0), tight()),
            GraphEdge::odometry(key(0), key(1), pose_x(1.0), loose()),
        ];
        assert_relative_eq!(total_error(&factors, &values), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_prior_pulls_node_to_measurement() {
        let mut values: BTreeMap<Key, Pose3D> =
            [(key(0), pose_x(2.0))].into_iter().collect();
        let factors = vec![GraphEdge::prior(key(0), pose_x(0.0), tight())];
        let result = optimize(&factors, &mut values, &GaussNewtonConfig::default());
        assert!(result.converged);
        assert_relative_eq!(values[&key(0)].translation().x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_chain_optimization_reduces_error() {
        // Odometry says 1 m steps but the initial guesses disagree.
        let mut values: BTreeMap<Key, Pose3D> = [
            (key(0), pose_x(0.0)),
            (key(1), pose_x(1.3)),
            (key(2), pose_x(1.8)),
        ]
        .into_iter()
        .collect();
        let factors = vec![
            GraphEdge::prior(key(0), pose_x(0.0), tight()),
            GraphEdge::odometry(key(0), key(1), pose_x(1.0), loose()),
            GraphEdge::odometry(key(1), key(2), pose_x(1.0), loose()),
        ];
        let result = optimize(&factors, &mut values, &GaussNewtonConfig::default());
        assert!(result.final_error <= result.initial_error);
        assert_relative_eq!(values[&key(1)].translation().x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(values[&key(2)].translation().x, 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_tight_loop_closure_dominates() {
        // Five 1 m steps, then a tight identity closure back to the
        // start: the chain collapses toward the origin.
        let mut values: BTreeMap<Key, Pose3D> = (0..=5)
            .map(|i| (key(i), pose_x(i as f64)))
            .collect();
        let mut factors = vec![GraphEdge::prior(key(0), pose_x(0.0), tight())];
        for i in 0..5 {
            factors.push(GraphEdge::odometry(
                key(i),
                key(i + 1),
                pose_x(1.0),
                loose(),
            ));
        }
        factors.push(GraphEdge::loop_closure(
            key(5),
            key(0),
            Pose3D::identity(),
            Covariance6::from_precisions(0.0, 1e6),
        ));

        let config = GaussNewtonConfig {
            max_iterations: 100,
            ..Default::default()
        };
        let result = optimize(&factors, &mut values, &config);
        assert!(result.final_error < result.initial_error);
        assert!(values[&key(5)].translation_norm() < 1e-2);
    }

    #[test]
    fn test_range_factor_pulls_anchor() {
        let anchor = Key::new(b'u', 0);
        let mut values: BTreeMap<Key, Pose3D> = [
            (key(0), pose_x(0.0)),
            (anchor, pose_x(1.0)),
        ]
        .into_iter()
        .collect();
        let factors = vec![
            GraphEdge::prior(key(0), pose_x(0.0), tight()),
            GraphEdge::uwb_range(key(0), anchor, 2.0, 0.01),
        ];
        let result = optimize(&factors, &mut values, &GaussNewtonConfig::default());
        assert!(result.final_error < result.initial_error);
        assert_relative_eq!(
            values[&anchor].translation_norm(),
            2.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_attitude_factor_levels_roll() {
        let k = key(0);
        let mut values: BTreeMap<Key, Pose3D> = [(
            k,
            Pose3D::from_xyz_rpy(0.0, 0.0, 0.0, 0.2, 0.0, 0.0),
        )]
        .into_iter()
        .collect();
        // Gravity measured straight down the body z axis means the
        // body is level.
        let factors = vec![
            GraphEdge::imu_attitude(k, [0.0, 0.0, 1.0], 0.01),
            GraphEdge::prior(
                k,
                Pose3D::identity(),
                Covariance6::from_precisions(0.0, 1e4),
            ),
        ];
        let result = optimize(&factors, &mut values, &GaussNewtonConfig::default());
        assert!(result.final_error < result.initial_error);
        assert!(values[&k].rotation_angle() < 0.02);
    }
}
