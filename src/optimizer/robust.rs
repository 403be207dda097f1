//! Robust incremental optimizer.
//!
//! Wraps the Gauss-Newton solver behind the PCM outlier filter and a
//! checkpoint. `update` merges new factors and values into the stored
//! problem, screens loop closures, optimizes, and reports cost before
//! and after. It never partially applies: an internal failure restores
//! the checkpoint and surfaces as a solver error.

use std::collections::{BTreeMap, HashSet};

use crate::config::OptimizerConfig;
use crate::core::types::{Key, Pose3D};
use crate::error::{Result, SlamError};
use crate::graph::{EdgeKind, GraphEdge};

use super::gauss_newton::{
    optimize, total_error, GaussNewtonConfig, OptimizationResult, TerminationReason,
};
use super::pcm::{PcmConfig, PcmFilter};

/// Outcome of a successful update.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Total cost over the active factor set before optimizing.
    pub cost_before: f64,
    /// Total cost after optimizing.
    pub cost_after: f64,
    /// Solver pass details.
    pub result: OptimizationResult,
    /// Number of loop factors the PCM filter rejected this round.
    pub loops_rejected: usize,
}

/// Snapshot of the optimizer's problem, used for rollback.
#[derive(Debug, Clone)]
pub struct OptimizerCheckpoint {
    factors: Vec<GraphEdge>,
    values: BTreeMap<Key, Pose3D>,
    update_count: u32,
}

/// The robust optimizer.
#[derive(Debug, Clone)]
pub struct RobustOptimizer {
    config: OptimizerConfig,
    pcm: PcmFilter,
    factors: Vec<GraphEdge>,
    values: BTreeMap<Key, Pose3D>,
    update_count: u32,
}

impl RobustOptimizer {
    /// Create an optimizer with the given thresholds.
    pub fn new(config: OptimizerConfig) -> Self {
        let pcm = PcmFilter::new(PcmConfig {
            odometry_check_threshold: config.odometry_check_threshold,
            pairwise_check_threshold: config.pairwise_check_threshold,
        });
        Self {
            config,
            pcm,
            factors: Vec::new(),
            values: BTreeMap::new(),
            update_count: 0,
        }
    }

    /// Current estimates (read-through view).
    pub fn calculate_estimate(&self) -> &BTreeMap<Key, Pose3D> {
        &self.values
    }

    /// All stored factors, including PCM-rejected loops.
    pub fn factors(&self) -> &[GraphEdge] {
        &self.factors
    }

    /// Whether any state is held.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty() && self.values.is_empty()
    }

    /// Snapshot for rollback.
    pub fn checkpoint(&self) -> OptimizerCheckpoint {
        OptimizerCheckpoint {
            factors: self.factors.clone(),
            values: self.values.clone(),
            update_count: self.update_count,
        }
    }

    /// Restore a snapshot taken with [`RobustOptimizer::checkpoint`].
    pub fn restore(&mut self, checkpoint: OptimizerCheckpoint) {
        self.factors = checkpoint.factors;
        self.values = checkpoint.values;
        self.update_count = checkpoint.update_count;
    }

    /// Drop every stored factor and value (reload preamble).
    pub fn reset(&mut self) {
        self.factors.clear();
        self.values.clear();
        self.update_count = 0;
    }

    /// Remove stored between-factors connecting `key1` and `key2`.
    pub fn remove_between(&mut self, key1: Key, key2: Key) {
        self.factors.retain(|f| {
            f.kind == EdgeKind::Prior || !(f.between_payload().is_some() && f.connects(key1, key2))
        });
    }

    /// Merge new factors and values, screen outliers, and optimize.
    ///
    /// `new_values` entries for keys already present are ignored (the
    /// stored estimate wins). Returns the costs around the pass; the
    /// caller swaps `calculate_estimate()` into the graph afterwards.
    pub fn update(
        &mut self,
        new_factors: Vec<GraphEdge>,
        new_values: Vec<(Key, Pose3D)>,
    ) -> Result<UpdateOutcome> {
        let checkpoint = self.checkpoint();
        match self.update_inner(new_factors, new_values) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.restore(checkpoint);
                Err(e)
            }
        }
    }

    fn update_inner(
        &mut self,
        new_factors: Vec<GraphEdge>,
        new_values: Vec<(Key, Pose3D)>,
    ) -> Result<UpdateOutcome> {
        for (key, pose) in new_values {
            self.values.entry(key).or_insert(pose);
        }

        // Manual closures ride through PCM on their first admission.
        let mut exempt: HashSet<usize> = HashSet::new();
        let base = self.factors.len();
        let has_new_loop = new_factors
            .iter()
            .any(|f| f.kind == EdgeKind::LoopClose || f.kind == EdgeKind::Artifact);
        for (offset, factor) in new_factors.into_iter().enumerate() {
            if factor.pcm_exempt_once {
                exempt.insert(base + offset);
            }
            self.factors.push(factor);
        }

        let keep = self.pcm.consistent_loops(&self.factors, &exempt);
        let loops_rejected = self
            .factors
            .iter()
            .enumerate()
            .filter(|(i, f)| {
                f.kind == EdgeKind::LoopClose
                    && f.from.is_pose()
                    && f.to.is_pose()
                    && !keep.contains(i)
            })
            .count();
        if loops_rejected > 0 {
            log::warn!("PCM rejected {} loop factor(s) this round", loops_rejected);
        }

        // Reduced problem: everything except rejected loop closures.
        let active: Vec<GraphEdge> = self
            .factors
            .iter()
            .enumerate()
            .filter(|(i, f)| {
                !(f.kind == EdgeKind::LoopClose && f.from.is_pose() && f.to.is_pose())
                    || keep.contains(i)
            })
            .map(|(_, f)| f.clone())
            .collect();

        let cost_before = total_error(&active, &self.values);

        // Full relinearization every `relinearize_skip` updates or when
        // the graph topology changed; a single damped step otherwise.
        self.update_count += 1;
        let full_pass = has_new_loop
            || self.config.relinearize_skip <= 1
            || self.update_count % self.config.relinearize_skip == 0;
        let gn_config = GaussNewtonConfig {
            max_iterations: if full_pass {
                self.config.max_iterations
            } else {
                1
            },
            convergence_threshold: self.config.relinearize_threshold * 1e-6,
            ..Default::default()
        };

        let result = optimize(&active, &mut self.values, &gn_config);
        if result.termination_reason == TerminationReason::SolveFailed {
            return Err(SlamError::Solver(
                "normal equations not positive definite".to_string(),
            ));
        }

        // Exemptions are single-use: next round these loops face PCM.
        for f in &mut self.factors {
            f.pcm_exempt_once = false;
        }

        let cost_after = total_error(&active, &self.values);
        Ok(UpdateOutcome {
            cost_before,
            cost_after,
            result,
            loops_rejected,
        })
    }
}
