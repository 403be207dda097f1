//! Authoritative pose-graph store.
//!
//! Owns the nodes, edges, keyed scans, and the time index. All
//! mutations are staged (`track_*`) and applied on `commit`; optimized
//! estimates are swapped in atomically. Nothing here talks to the
//! solver directly — the engine drives commits through the sanity gate
//! and the robust optimizer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{Covariance6, Key, PointCloud3D, Pose3D, ERROR_KEY};
use crate::error::{Result, SlamError};
use crate::io::messages::{PoseGraphMsg, PoseGraphNodeMsg};

use super::edge::{EdgeKind, GraphEdge};
use super::time_index::TimeIndex;

/// A variable in the graph: a robot pose, landmark, or anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Graph key.
    pub key: Key,
    /// Current world-frame estimate.
    pub pose: Pose3D,
    /// Creation stamp, nanoseconds.
    pub stamp_ns: u64,
    /// External stable identifier (artifact uuid, uwb id); empty for
    /// pose nodes.
    pub id_string: String,
}

/// Pending mutations accumulated between commits.
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    /// Factors staged by `track_factor` / `track_prior`.
    pub factors: Vec<GraphEdge>,
    /// Values for keys inserted since the last commit.
    pub values: Vec<(Key, Pose3D)>,
}

impl PendingBatch {
    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty() && self.values.is_empty()
    }
}

/// Statistics from merging a wire message into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgUpdateStats {
    /// Nodes that were not present before the merge.
    pub nodes_added: usize,
    /// Edges that were not present before the merge.
    pub edges_added: usize,
}

/// The pose graph: single-writer store behind the ingest thread.
#[derive(Debug, Clone, Default)]
pub struct PoseGraph {
    nodes: BTreeMap<Key, Node>,
    edges: Vec<GraphEdge>,
    keyed_scans: BTreeMap<Key, PointCloud3D>,
    time_index: TimeIndex,
    pending: PendingBatch,
    /// Most recently created pose key (odometry chain head).
    latest_pose_key: Key,
    /// First key of this deployment's own chain (prior anchor).
    initial_key: Key,
}

impl PoseGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            latest_pose_key: ERROR_KEY,
            initial_key: ERROR_KEY,
            ..Self::default()
        }
    }

    /// Seed the graph with its initial pose node and prior.
    ///
    /// Mirrors process start: the first key of the robot prefix gets
    /// the fiducial-calibrated pose and the configured prior noise.
    pub fn initialize(
        &mut self,
        initial_key: Key,
        pose: Pose3D,
        covariance: Covariance6,
        stamp_ns: u64,
    ) -> Result<()> {
        self.initial_key = initial_key;
        self.insert_node(initial_key, pose, stamp_ns, None)?;
        self.pending
            .factors
            .push(GraphEdge::prior(initial_key, pose, covariance));
        Ok(())
    }

    /// First key of this deployment's own chain.
    pub fn initial_key(&self) -> Key {
        self.initial_key
    }

    /// Most recently created pose key.
    pub fn latest_pose_key(&self) -> Key {
        self.latest_pose_key
    }

    /// Insert a node. Fails on key collision.
    ///
    /// Pose keys are additionally registered in the time index; the
    /// optimizer learns about the value at the next commit.
    pub fn insert_node(
        &mut self,
        key: Key,
        pose: Pose3D,
        stamp_ns: u64,
        id_string: Option<&str>,
    ) -> Result<()> {
        if self.nodes.contains_key(&key) {
            return Err(SlamError::KeyCollision(key));
        }
        self.nodes.insert(
            key,
            Node {
                key,
                pose,
                stamp_ns,
                id_string: id_string.unwrap_or("").to_string(),
            },
        );
        if key.is_pose() {
            self.time_index.insert(stamp_ns, key);
            if self.latest_pose_key == ERROR_KEY || key > self.latest_pose_key {
                self.latest_pose_key = key;
            }
        }
        self.pending.values.push((key, pose));
        Ok(())
    }

    /// Stage a factor. Both endpoints must already resolve.
    pub fn track_factor(&mut self, edge: GraphEdge) -> Result<()> {
        if !self.nodes.contains_key(&edge.from) {
            return Err(SlamError::KeyMissing(edge.from));
        }
        if !self.nodes.contains_key(&edge.to) {
            return Err(SlamError::KeyMissing(edge.to));
        }
        self.pending.factors.push(edge);
        Ok(())
    }

    /// Stage a prior. At most one prior may exist per key; a duplicate
    /// is skipped with a warning and `Ok(false)`.
    pub fn track_prior(&mut self, key: Key, pose: Pose3D, covariance: Covariance6) -> Result<bool> {
        if !self.nodes.contains_key(&key) {
            return Err(SlamError::KeyMissing(key));
        }
        let has_prior = self
            .edges
            .iter()
            .chain(self.pending.factors.iter())
            .any(|e| e.kind == EdgeKind::Prior && e.from == key);
        if has_prior {
            log::warn!("key {} already has a prior, skipping", key);
            return Ok(false);
        }
        self.pending.factors.push(GraphEdge::prior(key, pose, covariance));
        Ok(true)
    }

    /// Attach a scan to a pose node. Write-once per key.
    pub fn insert_keyed_scan(&mut self, key: Key, cloud: PointCloud3D) -> Result<()> {
        if !self.nodes.contains_key(&key) {
            return Err(SlamError::KeyMissing(key));
        }
        if self.keyed_scans.contains_key(&key) {
            return Err(SlamError::KeyCollision(key));
        }
        self.keyed_scans.insert(key, cloud);
        Ok(())
    }

    /// Take the pending batch, leaving the store's staged state empty.
    ///
    /// The engine hands the batch to the robust optimizer; on success
    /// the staged factors become committed edges via
    /// [`PoseGraph::apply_committed`].
    pub fn take_pending(&mut self) -> PendingBatch {
        std::mem::take(&mut self.pending)
    }

    /// Record factors as committed and swap in optimized estimates.
    pub fn apply_committed(&mut self, factors: Vec<GraphEdge>, values: &BTreeMap<Key, Pose3D>) {
        self.edges.extend(factors);
        self.swap_values(values);
    }

    /// Atomically replace node estimates with solver output.
    pub fn swap_values(&mut self, values: &BTreeMap<Key, Pose3D>) {
        for (key, pose) in values {
            if let Some(node) = self.nodes.get_mut(key) {
                node.pose = *pose;
            }
        }
    }

    /// Remove the between-factor connecting two keys.
    ///
    /// Refused for consecutive keys on an odometry chain. Returns the
    /// indices of removed committed edges (for the optimizer).
    pub fn remove_factor(&mut self, key1: Key, key2: Key) -> Result<Vec<usize>> {
        if key1.is_consecutive(&key2) {
            log::warn!(
                "refusing to remove consecutive odometry pair {} - {}",
                key1,
                key2
            );
            return Err(SlamError::SanityRejected(format!(
                "cannot remove consecutive odometry edge {} - {}",
                key1, key2
            )));
        }
        let removed: Vec<usize> = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind != EdgeKind::Prior && e.connects(key1, key2))
            .map(|(i, _)| i)
            .collect();
        if removed.is_empty() {
            return Err(SlamError::KeyMissing(key1));
        }
        // Remove from the back so earlier indices stay valid.
        for &i in removed.iter().rev() {
            self.edges.remove(i);
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Read-only queries
    // ------------------------------------------------------------------

    /// Whether a key exists.
    pub fn has_key(&self, key: &Key) -> bool {
        self.nodes.contains_key(key)
    }

    /// Node lookup.
    pub fn get_node(&self, key: &Key) -> Option<&Node> {
        self.nodes.get(key)
    }

    /// Pose lookup.
    pub fn get_pose(&self, key: &Key) -> Result<Pose3D> {
        self.nodes
            .get(key)
            .map(|n| n.pose)
            .ok_or(SlamError::KeyMissing(*key))
    }

    /// Pose of the most recently created pose node.
    pub fn last_pose(&self) -> Result<Pose3D> {
        self.get_pose(&self.latest_pose_key)
    }

    /// Pose key closest in time to `stamp_ns` (see
    /// [`TimeIndex::closest_key`] for edge cases).
    pub fn get_closest_key_at_time(&self, stamp_ns: u64, threshold_ns: u64) -> Key {
        self.time_index
            .closest_key(stamp_ns, threshold_ns, self.latest_pose_key)
    }

    /// Scan stored for a key.
    pub fn get_keyed_scan(&self, key: &Key) -> Option<&PointCloud3D> {
        self.keyed_scans.get(key)
    }

    /// Whether a key has a stored scan.
    pub fn has_scan(&self, key: &Key) -> bool {
        self.keyed_scans.contains_key(key)
    }

    /// All nodes in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All committed edges in insertion order.
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Keyed scans in key order.
    pub fn keyed_scans(&self) -> impl Iterator<Item = (&Key, &PointCloud3D)> {
        self.keyed_scans.iter()
    }

    /// Committed edges of one kind.
    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of committed edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of committed loop closures.
    pub fn num_loop_closures(&self) -> usize {
        self.edges_of_kind(EdgeKind::LoopClose).count()
    }

    /// Stamp of a key, if indexed.
    pub fn stamp_of(&self, key: &Key) -> Option<u64> {
        self.time_index
            .stamp_of(key)
            .or_else(|| self.nodes.get(key).map(|n| n.stamp_ns))
    }

    /// World-frame cloud assembled from every keyed scan at the
    /// current estimates.
    pub fn maximum_likelihood_points(&self) -> Result<PointCloud3D> {
        let mut out = PointCloud3D::new();
        for (key, scan) in &self.keyed_scans {
            let pose = self.get_pose(key)?;
            out.extend_from(&scan.transformed(&pose));
        }
        Ok(out)
    }

    /// Erase all graph state (rollback preamble before a reload).
    pub fn erase(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.keyed_scans.clear();
        self.time_index.clear();
        self.pending = PendingBatch::default();
        self.latest_pose_key = ERROR_KEY;
        self.initial_key = ERROR_KEY;
    }

    /// Insert a node during bundle load, indexing its stamp only when
    /// the bundle recorded one (keys without scans lose their stamps on
    /// save, matching the bundle format).
    pub(crate) fn insert_node_unstamped(
        &mut self,
        key: Key,
        pose: Pose3D,
        stamp_ns: Option<u64>,
    ) -> Result<()> {
        if self.nodes.contains_key(&key) {
            return Err(SlamError::KeyCollision(key));
        }
        self.nodes.insert(
            key,
            Node {
                key,
                pose,
                stamp_ns: stamp_ns.unwrap_or(0),
                id_string: String::new(),
            },
        );
        if key.is_pose() {
            if let Some(stamp) = stamp_ns {
                self.time_index.insert(stamp, key);
            }
            if self.latest_pose_key == ERROR_KEY || key > self.latest_pose_key {
                self.latest_pose_key = key;
            }
        }
        Ok(())
    }

    pub(crate) fn set_initial_key(&mut self, key: Key) {
        self.initial_key = key;
    }

    pub(crate) fn set_latest_pose_key(&mut self, key: Key) {
        self.latest_pose_key = key;
    }

    pub(crate) fn register_stamp(&mut self, stamp_ns: u64, key: Key) {
        self.time_index.insert(stamp_ns, key);
    }

    // ------------------------------------------------------------------
    // Wire representation
    // ------------------------------------------------------------------

    /// Full snapshot as a wire message (`incremental = false`).
    pub fn to_msg(&self) -> PoseGraphMsg {
        let nodes = self
            .nodes
            .values()
            .map(|n| PoseGraphNodeMsg {
                key: n.key.raw(),
                stamp_ns: n.stamp_ns,
                pose: n.pose,
                id_string: n.id_string.clone(),
            })
            .collect();
        let edges = self.edges.iter().map(crate::io::messages::edge_to_msg).collect();
        PoseGraphMsg {
            stamp_ns: self
                .nodes
                .values()
                .map(|n| n.stamp_ns)
                .max()
                .unwrap_or(0),
            nodes,
            edges,
            incremental: false,
        }
    }

    /// Merge a wire message into the store.
    ///
    /// `incremental = false` clears and rebuilds. Nodes are inserted
    /// only when their key is absent; edges only when `(from, to,
    /// kind)` is absent — replaying the same message is a no-op.
    pub fn update_from_msg(&mut self, msg: &PoseGraphMsg) -> Result<MsgUpdateStats> {
        if !msg.incremental {
            self.erase();
        }
        let mut stats = MsgUpdateStats::default();
        for node in &msg.nodes {
            let key = Key::from_raw(node.key);
            if self.nodes.contains_key(&key) {
                continue;
            }
            let id = if node.id_string.is_empty() {
                None
            } else {
                Some(node.id_string.as_str())
            };
            self.insert_node(key, node.pose, node.stamp_ns, id)?;
            stats.nodes_added += 1;
        }
        for edge_msg in &msg.edges {
            let edge = crate::io::messages::edge_from_msg(edge_msg)?;
            if self.edges.iter().any(|e| e.identity() == edge.identity()) {
                continue;
            }
            if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(&edge.to) {
                log::warn!(
                    "dropping wire edge {} -> {} with unknown endpoint",
                    edge.from,
                    edge.to
                );
                continue;
            }
            self.edges.push(edge);
            stats.edges_added += 1;
        }
        Ok(stats)
    }
}
