//! Checkpoint-and-rollback gate around graph mutations.
//!
//! Every commit that can reshape the graph runs through here: snapshot,
//! apply, then compare the translation change at the previous pose node
//! and the total cost before/after. A violation restores the snapshot
//! and reports rejection; the public graph state is then
//! indistinguishable from the pre-operation state.

use std::io::Write;
use std::path::Path;

use crate::config::SanityConfig;
use crate::core::types::ERROR_KEY;
use crate::error::{Result, SlamError};
use crate::graph::{EdgeKind, PoseGraph};
use crate::optimizer::{RobustOptimizer, UpdateOutcome};

/// The gate policy object.
#[derive(Debug, Clone)]
pub struct SanityGate {
    config: SanityConfig,
}

impl SanityGate {
    /// Create a gate with the given thresholds.
    pub fn new(config: SanityConfig) -> Self {
        Self { config }
    }

    /// Threshold for odometry extensions.
    pub fn odom_threshold(&self) -> f64 {
        self.config.translational_sanity_check_odom
    }

    /// Threshold for loop closures.
    pub fn lc_threshold(&self) -> f64 {
        self.config.translational_sanity_check_lc
    }

    /// Commit the graph's pending batch through the optimizer,
    /// guarded by the per-operation translation threshold.
    ///
    /// On acceptance the batch becomes committed edges and the
    /// optimized estimates are swapped in. On rejection or solver
    /// failure both the graph and the optimizer are restored and an
    /// error is returned.
    pub fn guarded_commit(
        &self,
        graph: &mut PoseGraph,
        optimizer: &mut RobustOptimizer,
        threshold: f64,
    ) -> Result<UpdateOutcome> {
        let graph_snapshot = graph.clone();
        let optimizer_checkpoint = optimizer.checkpoint();
        let watched_key = graph_snapshot.latest_pose_key();
        let prev_pose = if watched_key != ERROR_KEY {
            graph_snapshot.get_pose(&watched_key).ok()
        } else {
            None
        };

        let batch = graph.take_pending();
        if batch.is_empty() {
            return Err(SlamError::SanityRejected("empty commit".to_string()));
        }
        let factors = batch.factors.clone();

        let outcome = match optimizer.update(batch.factors, batch.values) {
            Ok(outcome) => outcome,
            Err(e) => {
                dump_diagnostics(optimizer, Path::new("factor_graph_dump.txt"));
                *graph = graph_snapshot;
                optimizer.restore(optimizer_checkpoint);
                return Err(e);
            }
        };

        if self.config.b_check_deltas {
            if let Some(prev) = prev_pose {
                let new = optimizer
                    .calculate_estimate()
                    .get(&watched_key)
                    .copied()
                    .unwrap_or(prev);
                let delta = prev.translation_distance(&new);
                let cost_increased =
                    outcome.cost_after > outcome.cost_before * (1.0 + 1e-9) + 1e-12;
                if delta > threshold || cost_increased {
                    if delta > threshold {
                        log::warn!(
                            "update moved {} by {:.3} m (limit {:.3}), rejecting",
                            watched_key,
                            delta,
                            threshold
                        );
                    }
                    if cost_increased {
                        log::warn!(
                            "cost increased {:.4} -> {:.4}, rejecting",
                            outcome.cost_before,
                            outcome.cost_after
                        );
                    }
                    *graph = graph_snapshot;
                    optimizer.restore(optimizer_checkpoint);
                    return Err(SlamError::SanityRejected(format!(
                        "translation delta {:.3} m, cost {:.4} -> {:.4}",
                        delta, outcome.cost_before, outcome.cost_after
                    )));
                }
            }
        }

        graph.apply_committed(factors, optimizer.calculate_estimate());
        Ok(outcome)
    }
}

/// Write a readable dump of the factor graph for post-mortem analysis.
///
/// Disk errors here only log: the dump must never take down the ingest
/// loop that is already handling a solver failure.
pub fn dump_diagnostics(optimizer: &RobustOptimizer, path: &Path) {
    let mut out = match std::fs::File::create(path) {
        Ok(f) => f,
        Err(e) => {
            log::error!("failed to create diagnostics dump {}: {}", path.display(), e);
            return;
        }
    };
    for (i, f) in optimizer.factors().iter().enumerate() {
        let line = match f.kind {
            EdgeKind::Prior => format!("{:5} PRIOR     {}\n", i, f.from),
            kind => format!("{:5} {:?} {} -> {}\n", i, kind, f.from, f.to),
        };
        if let Err(e) = out.write_all(line.as_bytes()) {
            log::error!("failed to write diagnostics dump: {}", e);
            return;
        }
    }
    log::info!("dumped {} factors to {}", optimizer.factors().len(), path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Covariance6, Key, Pose3D};
    use crate::graph::GraphEdge;

    fn key(i: u64) -> Key {
        Key::new(b'a', i)
    }

    fn pose_x(x: f64) -> Pose3D {
        Pose3D::from_translation(x, 0.0, 0.0)
    }

    fn setup() -> (PoseGraph, RobustOptimizer, SanityGate) {
        let mut graph = PoseGraph::new();
        graph
            .initialize(
                key(0),
                Pose3D::identity(),
                Covariance6::from_sigmas(0.001, 0.001),
                0,
            )
            .unwrap();
        let mut optimizer = RobustOptimizer::new(Default::default());
        let gate = SanityGate::new(SanityConfig::default());
        gate.guarded_commit(&mut graph, &mut optimizer, 1.0).unwrap();
        (graph, optimizer, gate)
    }

    fn extend(graph: &mut PoseGraph, i: u64) {
        let from = key(i - 1);
        let to = key(i);
        let last = graph.get_pose(&from).unwrap();
        graph
            .insert_node(to, last.compose(&pose_x(1.0)), i * 100, None)
            .unwrap();
        graph
            .track_factor(GraphEdge::odometry(
                from,
                to,
                pose_x(1.0),
                Covariance6::from_sigmas(0.01, 0.1),
            ))
            .unwrap();
    }

    #[test]
    fn test_accepted_odometry_commit() {
        let (mut graph, mut optimizer, gate) = setup();
        extend(&mut graph, 1);
        let outcome = gate
            .guarded_commit(&mut graph, &mut optimizer, gate.odom_threshold())
            .unwrap();
        assert!(outcome.cost_after <= outcome.cost_before + 1e-9);
        assert_eq!(graph.num_edges(), 2);
    }

    #[test]
    fn test_rejected_commit_restores_state() {
        let (mut graph, mut optimizer, gate) = setup();
        for i in 1..=5 {
            extend(&mut graph, i);
            gate.guarded_commit(&mut graph, &mut optimizer, gate.odom_threshold())
                .unwrap();
        }
        let edges_before = graph.num_edges();
        let pose_before = graph.last_pose().unwrap();

        // A manual closure that teleports a5 to the origin violates a
        // tight translation threshold.
        let mut manual = GraphEdge::loop_closure(
            key(5),
            key(0),
            Pose3D::identity(),
            Covariance6::from_precisions(0.0, 1e6),
        );
        manual.pcm_exempt_once = true;
        graph.track_factor(manual).unwrap();
        let err = gate
            .guarded_commit(&mut graph, &mut optimizer, 0.05)
            .unwrap_err();
        assert!(matches!(err, SlamError::SanityRejected(_)));

        // Public state equals the pre-operation snapshot.
        assert_eq!(graph.num_edges(), edges_before);
        let pose_after = graph.last_pose().unwrap();
        assert!(pose_before.translation_distance(&pose_after) < 1e-12);
        assert_eq!(optimizer.calculate_estimate().len(), 6);
    }

    #[test]
    fn test_empty_commit_rejected() {
        let (mut graph, mut optimizer, gate) = setup();
        assert!(gate
            .guarded_commit(&mut graph, &mut optimizer, 1.0)
            .is_err());
    }

    #[test]
    fn test_gate_disabled_accepts_large_moves() {
        let (mut graph, mut optimizer, _) = setup();
        for i in 1..=5 {
            extend(&mut graph, i);
            let gate = SanityGate::new(SanityConfig::default());
            gate.guarded_commit(&mut graph, &mut optimizer, 10.0).unwrap();
        }
        let gate = SanityGate::new(SanityConfig {
            b_check_deltas: false,
            ..Default::default()
        });
        let mut manual = GraphEdge::loop_closure(
            key(5),
            key(0),
            Pose3D::identity(),
            Covariance6::from_precisions(0.0, 1e6),
        );
        manual.pcm_exempt_once = true;
        graph.track_factor(manual).unwrap();
        gate.guarded_commit(&mut graph, &mut optimizer, 0.05).unwrap();
        assert!(graph.last_pose().unwrap().translation_norm() < 0.1);
    }
}
