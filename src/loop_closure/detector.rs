//! Proximity-based loop-closure detection.
//!
//! Triggered once per newly keyed scan. Candidates are older keyframes
//! whose estimated positions lie within the proximity threshold; each
//! candidate is registered with ICP and accepted closures are committed
//! through the sanity gate, one factor at a time.

use crate::config::{BackupConfig, LoopClosureConfig};
use crate::core::types::Key;
use crate::error::{Result, SlamError};
use crate::graph::{GraphEdge, PoseGraph, SanityGate};
use crate::io::persistence;
use crate::optimizer::RobustOptimizer;
use crate::registration::ScanRegistration;

/// What a detection pass produced.
#[derive(Debug, Clone, Default)]
pub struct LoopClosureSummary {
    /// Keys the query was successfully closed against.
    pub closed_with: Vec<Key>,
    /// Candidates whose registration failed.
    pub registration_failures: usize,
    /// Closures rejected by the sanity gate.
    pub sanity_rejections: usize,
}

impl LoopClosureSummary {
    /// Whether at least one closure was committed.
    pub fn closed(&self) -> bool {
        !self.closed_with.is_empty()
    }
}

/// The detector.
#[derive(Debug)]
pub struct LoopClosureDetector {
    config: LoopClosureConfig,
    backup: BackupConfig,
    registration: ScanRegistration,
    /// Recent-pose exclusion window, in keys.
    skip_recent_poses: u64,
    /// Minimum key spacing between accepted closures.
    poses_before_reclosing: u64,
    /// Query key of the most recent accepted closure.
    last_closure_key: Option<Key>,
}

impl LoopClosureDetector {
    /// Build the detector from its configuration pieces.
    pub fn new(
        config: LoopClosureConfig,
        backup: BackupConfig,
        registration: ScanRegistration,
        skip_recent_poses: u64,
        poses_before_reclosing: u64,
    ) -> Self {
        Self {
            config,
            backup,
            registration,
            skip_recent_poses,
            poses_before_reclosing,
            last_closure_key: None,
        }
    }

    /// Suppress periodic checkpointing (batch sweeps set this).
    pub fn set_backup_enabled(&mut self, enabled: bool) {
        self.backup.save_posegraph_backup = enabled;
    }

    /// Whether checkpointing is currently enabled.
    pub fn backup_enabled(&self) -> bool {
        self.backup.save_posegraph_backup
    }

    /// Whether checking is enabled at all.
    pub fn enabled(&self) -> bool {
        self.config.check_for_loop_closures
    }

    /// Run detection for the newly keyed scan at `key`.
    pub fn find_loop_closures(
        &mut self,
        key: Key,
        graph: &mut PoseGraph,
        optimizer: &mut RobustOptimizer,
        gate: &SanityGate,
    ) -> Result<LoopClosureSummary> {
        let mut summary = LoopClosureSummary::default();

        // Periodic checkpoint, counted in new keys.
        if self.backup.save_posegraph_backup
            && self.backup.keys_between_each_posegraph_backup > 0
            && key.index() % self.backup.keys_between_each_posegraph_backup == 0
        {
            self.write_backup(graph);
        }

        if !self.config.check_for_loop_closures {
            return Ok(summary);
        }
        if !graph.has_scan(&key) {
            log::warn!("key {} has no scan, skipping loop search", key);
            return Ok(summary);
        }
        if let Some(last) = self.last_closure_key {
            if let Some(spacing) = key.index_distance(&last) {
                if spacing < self.poses_before_reclosing {
                    return Ok(summary);
                }
            }
        }

        let pose1 = graph.get_pose(&key)?;
        let scan1 = graph
            .get_keyed_scan(&key)
            .ok_or(SlamError::KeyMissing(key))?
            .clone();

        // Filter and transform the query once for all candidates.
        let source_world = self
            .registration
            .filter()
            .apply(&scan1)
            .transformed(&pose1);

        let candidates: Vec<Key> = graph
            .nodes()
            .filter(|n| n.key < key && n.key.is_pose())
            .map(|n| n.key)
            .filter(|o| graph.has_scan(o))
            .filter(|o| match key.index_distance(o) {
                // Same chain: stay clear of the recent window.
                Some(d) => d >= self.skip_recent_poses,
                // Other robots' chains are always eligible.
                None => true,
            })
            .collect();

        let mut backup_written = false;
        for other in candidates {
            if self.config.only_one_per_scan && summary.closed() {
                break;
            }
            let pose2 = graph.get_pose(&other)?;
            if pose1.translation_distance(&pose2) >= self.config.proximity_threshold {
                continue;
            }

            let scan2 = graph
                .get_keyed_scan(&other)
                .ok_or(SlamError::KeyMissing(other))?
                .clone();

            let output = match self.registration.register(
                &scan1,
                &scan2,
                &pose1,
                &pose2,
                Some(&source_world),
            ) {
                Ok(output) => output,
                Err(SlamError::RegistrationFailed(reason)) => {
                    log::debug!("registration {} -> {} failed: {}", key, other, reason);
                    summary.registration_failures += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Checkpoint once before the first graph-reshaping commit.
            if self.backup.save_posegraph_backup && !backup_written {
                self.write_backup(graph);
                backup_written = true;
            }

            graph.track_factor(GraphEdge::loop_closure(
                key,
                other,
                output.delta,
                output.covariance,
            ))?;

            match gate.guarded_commit(graph, optimizer, gate.lc_threshold()) {
                Ok(outcome) => {
                    log::info!(
                        "loop closure {} -> {} accepted (fitness {:.4}, cost {:.4} -> {:.4})",
                        key,
                        other,
                        output.fitness,
                        outcome.cost_before,
                        outcome.cost_after
                    );
                    summary.closed_with.push(other);
                    self.last_closure_key = Some(key);
                }
                Err(SlamError::SanityRejected(reason)) => {
                    log::warn!("loop closure {} -> {} rejected: {}", key, other, reason);
                    summary.sanity_rejections += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    fn write_backup(&self, graph: &PoseGraph) {
        if let Err(e) =
            persistence::save_bundle(graph, std::path::Path::new(&self.backup.backup_path))
        {
            // Skipping a checkpoint must not disturb in-memory state.
            log::error!("failed to write backup bundle: {}", e);
        }
    }
}
