//! Pairwise consistency maximization.
//!
//! Before optimization, candidate loop closures are screened two ways:
//! against the odometry chain connecting their endpoints (Mahalanobis
//! distance of the cycle residual), and against each other (mutual
//! consistency of loop pairs). The surviving set is the largest
//! mutually-consistent clique. Landmark and anchor factors are exempt:
//! only loop closures between pose keys are candidates.

use std::collections::{BTreeMap, HashSet};

use crate::core::math::{log_decoupled, mahalanobis_norm};
use crate::core::types::{Covariance6, Key, Pose3D};
use crate::graph::{EdgeKind, GraphEdge};

/// PCM thresholds.
#[derive(Debug, Clone)]
pub struct PcmConfig {
    /// Mahalanobis bound for the loop-vs-odometry cycle residual.
    pub odometry_check_threshold: f64,
    /// Mahalanobis bound for loop-pair cycle residuals.
    pub pairwise_check_threshold: f64,
}

/// Per-prefix odometry chains extracted from the factor set.
#[derive(Debug, Default)]
struct OdometryChains {
    /// `prefix → (index → (delta, covariance))` for each edge
    /// `(prefix, index) → (prefix, index+1)`.
    chains: BTreeMap<u8, BTreeMap<u64, (Pose3D, Covariance6)>>,
}

impl OdometryChains {
    fn build(factors: &[GraphEdge]) -> Self {
        let mut chains: BTreeMap<u8, BTreeMap<u64, (Pose3D, Covariance6)>> = BTreeMap::new();
        for f in factors {
            if f.kind != EdgeKind::Odom {
                continue;
            }
            let Some((delta, cov)) = f.between_payload() else {
                continue;
            };
            if f.from.prefix() == f.to.prefix() && f.to.index() == f.from.index() + 1 {
                chains
                    .entry(f.from.prefix())
                    .or_default()
                    .insert(f.from.index(), (*delta, *cov));
            }
        }
        Self { chains }
    }

    /// Relative pose `X_a⁻¹ X_b` along the odometry chain, with the
    /// accumulated covariance. `None` when the chain is incomplete or
    /// the keys live on different chains.
    fn relative(&self, a: Key, b: Key) -> Option<(Pose3D, Covariance6)> {
        if a.prefix() != b.prefix() {
            return None;
        }
        if a == b {
            return Some((Pose3D::identity(), Covariance6::from_sigmas(1e-6, 1e-6)));
        }
        let chain = self.chains.get(&a.prefix())?;
        let (lo, hi, invert) = if a.index() < b.index() {
            (a.index(), b.index(), false)
        } else {
            (b.index(), a.index(), true)
        };
        let mut pose = Pose3D::identity();
        let mut cov = Covariance6::new(nalgebra::Matrix6::zeros());
        for i in lo..hi {
            let (delta, c) = chain.get(&i)?;
            pose = pose.compose(delta);
            cov = cov.add(c);
        }
        if invert {
            pose = pose.inverse();
        }
        Some((pose, cov))
    }
}

/// The outlier filter itself.
#[derive(Debug, Clone)]
pub struct PcmFilter {
    config: PcmConfig,
}

impl PcmFilter {
    /// Create a filter with the given thresholds.
    pub fn new(config: PcmConfig) -> Self {
        Self { config }
    }

    /// Indices (into `factors`) of the loop closures that survive both
    /// checks, plus every index in `exempt` (admitted unconditionally).
    pub fn consistent_loops(
        &self,
        factors: &[GraphEdge],
        exempt: &HashSet<usize>,
    ) -> HashSet<usize> {
        let chains = OdometryChains::build(factors);

        // Candidates: loop closures between pose keys that are not
        // exempt this round.
        let candidates: Vec<usize> = factors
            .iter()
            .enumerate()
            .filter(|(i, f)| {
                f.kind == EdgeKind::LoopClose
                    && f.from.is_pose()
                    && f.to.is_pose()
                    && !exempt.contains(i)
            })
            .map(|(i, _)| i)
            .collect();

        // Stage 1: odometry consistency.
        let odom_ok: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| self.odometry_consistent(&factors[i], &chains))
            .collect();

        // Stage 2: mutual consistency graph + clique growth.
        let n = odom_ok.len();
        let mut adjacency = vec![vec![false; n]; n];
        for a in 0..n {
            for b in (a + 1)..n {
                let ok =
                    self.pairwise_consistent(&factors[odom_ok[a]], &factors[odom_ok[b]], &chains);
                adjacency[a][b] = ok;
                adjacency[b][a] = ok;
            }
        }
        let clique = greedy_max_clique(&adjacency);

        let mut keep: HashSet<usize> = clique.into_iter().map(|a| odom_ok[a]).collect();
        keep.extend(exempt.iter().copied());
        keep
    }

    /// Loop measurement vs the odometry chain between its endpoints.
    ///
    /// Loops whose endpoints have no complete chain (cross-robot
    /// closures at the base station) skip this check.
    fn odometry_consistent(&self, loop_factor: &GraphEdge, chains: &OdometryChains) -> bool {
        let Some((z, z_cov)) = loop_factor.between_payload() else {
            return false;
        };
        let Some((chain_pose, chain_cov)) = chains.relative(loop_factor.from, loop_factor.to)
        else {
            return true;
        };
        let residual = log_decoupled(&z.inverse().compose(&chain_pose));
        let total_cov = z_cov.add(&chain_cov);
        mahalanobis_norm(&residual, &total_cov.information()) < self.config.odometry_check_threshold
    }

    /// Cycle residual of a loop pair through the odometry chains.
    fn pairwise_consistent(
        &self,
        f1: &GraphEdge,
        f2: &GraphEdge,
        chains: &OdometryChains,
    ) -> bool {
        let (Some((z1, c1)), Some((z2, c2))) = (f1.between_payload(), f2.between_payload())
        else {
            return false;
        };
        // Cycle: from₁ → to₁ (z1), to₁ → to₂ (chain), to₂ → from₂
        // (z2⁻¹), from₂ → from₁ (chain).
        let (Some((o_to, c_to)), Some((o_from, c_from))) = (
            chains.relative(f1.to, f2.to),
            chains.relative(f2.from, f1.from),
        ) else {
            return true;
        };
        let cycle = z1
            .compose(&o_to)
            .compose(&z2.inverse())
            .compose(&o_from);
        let residual = log_decoupled(&cycle);
        let total_cov = c1.add(c2).add(&c_to).add(&c_from);
        mahalanobis_norm(&residual, &total_cov.information())
            < self.config.pairwise_check_threshold
    }
}

/// Greedy clique growth over a consistency graph, seeded from vertices
/// in degree order.
fn greedy_max_clique(adjacency: &[Vec<bool>]) -> Vec<usize> {
    let n = adjacency.len();
    if n == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&v| std::cmp::Reverse(adjacency[v].iter().filter(|&&x| x).count()));

    let mut best: Vec<usize> = Vec::new();
    for &seed in &order {
        let mut clique = vec![seed];
        for &v in &order {
            if v != seed && clique.iter().all(|&c| adjacency[c][v]) {
                clique.push(v);
            }
        }
        if clique.len() > best.len() {
            best = clique;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u64) -> Key {
        Key::new(b'a', i)
    }

    fn pose_x(x: f64) -> Pose3D {
        Pose3D::from_translation(x, 0.0, 0.0)
    }

    fn chain_factors(n: u64) -> Vec<GraphEdge> {
        (0..n)
            .map(|i| {
                GraphEdge::odometry(
                    key(i),
                    key(i + 1),
                    pose_x(1.0),
                    Covariance6::from_sigmas(0.01, 0.1),
                )
            })
            .collect()
    }

    fn filter() -> PcmFilter {
        PcmFilter::new(PcmConfig {
            odometry_check_threshold: 10.0,
            pairwise_check_threshold: 5.0,
        })
    }

    #[test]
    fn test_consistent_loop_survives() {
        let mut factors = chain_factors(5);
        // Loop agreeing with odometry: a5 back to a0 is -5 m.
        factors.push(GraphEdge::loop_closure(
            key(5),
            key(0),
            pose_x(-5.0),
            Covariance6::from_sigmas(0.01, 0.1),
        ));
        let keep = filter().consistent_loops(&factors, &HashSet::new());
        assert!(keep.contains(&5));
    }

    #[test]
    fn test_wild_loop_rejected() {
        let mut factors = chain_factors(5);
        // Loop claiming the robot is 40 m away from where odometry puts it.
        factors.push(GraphEdge::loop_closure(
            key(5),
            key(0),
            pose_x(35.0),
            Covariance6::from_sigmas(0.01, 0.1),
        ));
        let keep = filter().consistent_loops(&factors, &HashSet::new());
        assert!(!keep.contains(&5));
    }

    #[test]
    fn test_exempt_bypasses_checks() {
        let mut factors = chain_factors(5);
        factors.push(GraphEdge::loop_closure(
            key(5),
            key(0),
            pose_x(35.0),
            Covariance6::from_sigmas(0.01, 0.1),
        ));
        let exempt: HashSet<usize> = [5].into_iter().collect();
        let keep = filter().consistent_loops(&factors, &exempt);
        assert!(keep.contains(&5));
    }

    #[test]
    fn test_mutually_consistent_pair_kept_over_outlier() {
        let mut factors = chain_factors(8);
        let good_cov = Covariance6::from_sigmas(0.01, 0.1);
        // Two loops consistent with odometry and each other.
        factors.push(GraphEdge::loop_closure(key(6), key(0), pose_x(-6.0), good_cov));
        factors.push(GraphEdge::loop_closure(key(7), key(1), pose_x(-6.0), good_cov));
        // One loop that contradicts both (but with a huge covariance it
        // would pass the odometry gate, so give it a moderate one).
        factors.push(GraphEdge::loop_closure(
            key(8),
            key(0),
            pose_x(-3.0),
            Covariance6::from_sigmas(0.01, 0.3),
        ));
        let keep = filter().consistent_loops(&factors, &HashSet::new());
        assert!(keep.contains(&8));
        assert!(keep.contains(&9));
        assert!(!keep.contains(&10));
    }

    #[test]
    fn test_landmark_edges_are_not_candidates() {
        let mut factors = chain_factors(3);
        factors.push(GraphEdge::artifact(
            key(2),
            Key::new(b'l', 0),
            pose_x(1.0),
            Covariance6::default(),
        ));
        // Artifact edges are never filtered, so they are simply absent
        // from the keep-set (the robust layer includes them directly).
        let keep = filter().consistent_loops(&factors, &HashSet::new());
        assert!(!keep.contains(&3));
    }

    #[test]
    fn test_greedy_clique_simple() {
        // Triangle 0-1-2 plus isolated 3.
        let mut adj = vec![vec![false; 4]; 4];
        for (a, b) in [(0, 1), (1, 2), (0, 2)] {
            adj[a][b] = true;
            adj[b][a] = true;
        }
        let clique = greedy_max_clique(&adj);
        assert_eq!(clique.len(), 3);
        assert!(!clique.contains(&3));
    }
}
