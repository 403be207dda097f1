//! Base-station engine: multi-robot graph fusion.
//!
//! The base never creates pose keys of its own. Incoming fast graphs
//! from each robot are reconciled against the canonical slow graph by
//! the merger; fused output replaces the store, new loop-closure (and
//! optionally artifact) edges mark the graph for reoptimization, and
//! keyed scans are adopted write-once.

use std::path::Path;

use crate::config::SlamConfig;
use crate::core::types::{Covariance6, Key, PointCloud3D, Pose3D};
use crate::error::Result;
use crate::graph::{KeyAllocator, PoseGraph, SanityGate};
use crate::graph::GraphEdge;
use crate::ingest::ManualLoopClosureHandler;
use crate::io::messages::{edge_type, KeyedScanMsg, PoseGraphMsg};
use crate::io::persistence;
use crate::merger::GraphMerger;
use crate::optimizer::RobustOptimizer;

use super::robot::parse_artifact_gt;

/// What one base tick accomplished.
#[derive(Debug, Clone, Default)]
pub struct BaseTickSummary {
    /// Graphs consumed.
    pub graphs_merged: usize,
    /// Keyed scans adopted.
    pub scans_adopted: usize,
    /// Whether an optimization pass ran.
    pub optimized: bool,
}

/// The base-station deployment variant.
pub struct BaseEngine {
    config: SlamConfig,
    graph: PoseGraph,
    optimizer: RobustOptimizer,
    gate: SanityGate,
    allocator: KeyAllocator,
    merger: GraphMerger,
    manual: ManualLoopClosureHandler,
    graph_queue: Vec<PoseGraphMsg>,
    scan_queue: Vec<KeyedScanMsg>,
    needs_optimization: bool,
}

impl BaseEngine {
    /// Build an empty base engine.
    pub fn new(config: SlamConfig) -> Self {
        for name in &config.deployment.robot_names {
            log::info!("registered robot: {}", name);
        }
        Self {
            graph: PoseGraph::new(),
            optimizer: RobustOptimizer::new(config.optimizer.clone()),
            gate: SanityGate::new(config.sanity.clone()),
            allocator: KeyAllocator::new(),
            merger: GraphMerger::new(),
            manual: ManualLoopClosureHandler::new(),
            graph_queue: Vec::new(),
            scan_queue: Vec::new(),
            needs_optimization: false,
            config,
        }
    }

    /// The canonical graph (read-only).
    pub fn graph(&self) -> &PoseGraph {
        &self.graph
    }

    /// Manual closure handler, for operator requests.
    pub fn manual_mut(&mut self) -> &mut ManualLoopClosureHandler {
        &mut self.manual
    }

    /// Queue a fast graph from a robot.
    pub fn push_pose_graph(&mut self, msg: PoseGraphMsg) {
        self.graph_queue.push(msg);
    }

    /// Queue a keyed scan from a robot.
    pub fn push_keyed_scan(&mut self, msg: KeyedScanMsg) {
        self.scan_queue.push(msg);
    }

    /// One base tick: merge queued graphs, adopt scans, process manual
    /// closures, reoptimize when marked.
    pub fn tick(&mut self) -> Result<BaseTickSummary> {
        let mut summary = BaseTickSummary::default();

        for msg in std::mem::take(&mut self.graph_queue) {
            self.merge_fast_graph(&msg)?;
            summary.graphs_merged += 1;
        }

        for msg in std::mem::take(&mut self.scan_queue) {
            if self.adopt_keyed_scan(&msg) {
                summary.scans_adopted += 1;
            }
        }

        self.process_manual_data();

        if self.needs_optimization {
            self.needs_optimization = false;
            match self.optimizer.update(Vec::new(), Vec::new()) {
                Ok(outcome) => {
                    self.graph.swap_values(self.optimizer.calculate_estimate());
                    summary.optimized = true;
                    log::info!(
                        "base optimization: cost {:.4} -> {:.4}",
                        outcome.cost_before,
                        outcome.cost_after
                    );
                }
                Err(e) => log::error!("base optimization failed: {}", e),
            }
        }

        Ok(summary)
    }

    /// Fuse one fast graph through the merger and replace the store.
    fn merge_fast_graph(&mut self, msg: &PoseGraphMsg) -> Result<()> {
        // Slow graph first, then the delta.
        self.merger.on_slow_graph(&self.graph.to_msg());
        self.merger.on_fast_graph(msg);
        let fused = self.merger.current_graph();
        let stats = self.graph.update_from_msg(&fused)?;
        // The merge path syncs the optimizer itself; drop the staged
        // values the rebuild produced.
        let _ = self.graph.take_pending();

        // Adopt counters: the incoming graph wins.
        for node in &fused.nodes {
            self.allocator.observe(Key::from_raw(node.key));
        }

        // Scan the *incoming* edges for closure kinds that warrant a
        // reoptimization of the fused graph.
        for edge in &msg.edges {
            if edge.kind == edge_type::LOOPCLOSE {
                self.needs_optimization = true;
            }
            if self.config.deployment.b_optimize_on_artifacts && edge.kind == edge_type::ARTIFACT
            {
                self.needs_optimization = true;
            }
        }

        // Keep the optimizer's problem in sync with newly adopted state.
        if stats.nodes_added > 0 || stats.edges_added > 0 {
            let values: Vec<(Key, Pose3D)> = self
                .graph
                .nodes()
                .map(|n| (n.key, n.pose))
                .collect();
            let new_factors = self
                .graph
                .edges()
                .iter()
                .skip(self.optimizer.factors().len())
                .cloned()
                .collect();
            self.optimizer.update(new_factors, values)?;
            self.graph.swap_values(self.optimizer.calculate_estimate());
        }
        Ok(())
    }

    /// Adopt a keyed scan, write-once per key.
    fn adopt_keyed_scan(&mut self, msg: &KeyedScanMsg) -> bool {
        let key = Key::from_raw(msg.key);
        if self.graph.has_scan(&key) {
            return false;
        }
        match self.graph.insert_keyed_scan(key, msg.scan.clone()) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("keyed scan {} not adopted: {}", key, e);
                false
            }
        }
    }

    fn process_manual_data(&mut self) {
        let batch = self.manual.take_data();
        for closure in batch {
            if !self.graph.has_key(&closure.key_from) || !self.graph.has_key(&closure.key_to) {
                log::warn!(
                    "manual closure {} -> {} references unknown keys",
                    closure.key_from,
                    closure.key_to
                );
                continue;
            }
            let covariance = Covariance6::from_precisions(
                self.config.noise.manual_lc_rot_precision,
                self.config.noise.manual_lc_trans_precision,
            );
            let mut edge = GraphEdge::loop_closure(
                closure.key_from,
                closure.key_to,
                closure.relative_pose,
                covariance,
            );
            edge.pcm_exempt_once = true;
            if let Err(e) = self.graph.track_factor(edge) {
                log::warn!("manual closure rejected at base: {}", e);
                continue;
            }
            match self
                .gate
                .guarded_commit(&mut self.graph, &mut self.optimizer, self.gate.lc_threshold())
            {
                Ok(_) => self.needs_optimization = true,
                Err(e) => log::warn!("manual closure rejected at base: {}", e),
            }
        }
    }

    /// Attach configured ground-truth priors to known artifacts.
    pub fn process_artifact_gt(&mut self) -> Result<usize> {
        let mut applied = 0;
        let entries = self.config.deployment.artifact_gt.clone();
        for entry in &entries {
            let Some((id, position)) = parse_artifact_gt(entry) else {
                log::warn!("bad artifact ground truth entry: {:?}", entry);
                continue;
            };
            let Some(key) = self
                .graph
                .nodes()
                .find(|n| n.key.is_landmark() && n.id_string == id)
                .map(|n| n.key)
            else {
                log::warn!("no artifact node for ground truth id {}", id);
                continue;
            };
            let pose = Pose3D::from_parts(position, nalgebra::UnitQuaternion::identity());
            let noise = Covariance6::from_precisions(
                self.config.noise.artifact_rot_precision,
                self.config.noise.artifact_trans_precision,
            );
            if self.graph.track_prior(key, pose, noise)? {
                self.gate
                    .guarded_commit(&mut self.graph, &mut self.optimizer, self.gate.lc_threshold())?;
                applied += 1;
            }
        }
        if applied > 0 {
            self.needs_optimization = true;
        }
        Ok(applied)
    }

    /// Current map cloud assembled from the adopted keyed scans.
    pub fn map_cloud(&self) -> Result<PointCloud3D> {
        self.graph.maximum_likelihood_points()
    }

    /// Save the bundle.
    pub fn save(&self, path: &Path) -> Result<()> {
        persistence::save_bundle(&self.graph, path)
    }

    /// Load a bundle, replacing the canonical graph.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let init = &self.config.init;
        let covariance = Covariance6::from_sigma_vector(nalgebra::Vector6::new(
            init.orientation_sigma[0],
            init.orientation_sigma[1],
            init.orientation_sigma[2],
            init.position_sigma[0],
            init.position_sigma[1],
            init.position_sigma[2],
        ));
        persistence::load_bundle(path, &mut self.graph, &mut self.optimizer, &covariance)?;
        for node in self.graph.nodes() {
            self.allocator.observe(node.key);
        }
        Ok(())
    }
}
