//! Base-station graph merger.
//!
//! The merger reconciles the canonical *slow* graph (the committed,
//! post-optimization state) with *fast* incremental deltas arriving
//! from each robot. Nodes merge by key, edges by `(from, to, kind)`,
//! so replaying a fast graph is a no-op.

use std::collections::{BTreeMap, HashSet};

use crate::io::messages::{PoseGraphEdgeMsg, PoseGraphMsg, PoseGraphNodeMsg};

/// Fast/slow graph reconciliation state.
#[derive(Debug, Default)]
pub struct GraphMerger {
    nodes: BTreeMap<u64, PoseGraphNodeMsg>,
    edges: Vec<PoseGraphEdgeMsg>,
    edge_identities: HashSet<(u64, u64, u8)>,
    stamp_ns: u64,
}

impl GraphMerger {
    /// Create an empty merger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the canonical graph snapshot. This resets the fused state:
    /// the slow graph is authoritative for everything it contains.
    pub fn on_slow_graph(&mut self, msg: &PoseGraphMsg) {
        self.nodes.clear();
        self.edges.clear();
        self.edge_identities.clear();
        self.stamp_ns = 0;
        self.absorb(msg);
    }

    /// Feed one fast delta from a robot. Returns how many nodes and
    /// edges were actually new.
    pub fn on_fast_graph(&mut self, msg: &PoseGraphMsg) -> (usize, usize) {
        self.absorb(msg)
    }

    /// The fused graph, as a full (non-incremental) snapshot.
    pub fn current_graph(&self) -> PoseGraphMsg {
        PoseGraphMsg {
            stamp_ns: self.stamp_ns,
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.clone(),
            incremental: false,
        }
    }

    fn absorb(&mut self, msg: &PoseGraphMsg) -> (usize, usize) {
        let mut new_nodes = 0;
        let mut new_edges = 0;
        for node in &msg.nodes {
            if !self.nodes.contains_key(&node.key) {
                self.nodes.insert(node.key, node.clone());
                new_nodes += 1;
            }
            self.stamp_ns = self.stamp_ns.max(node.stamp_ns);
        }
        for edge in &msg.edges {
            let identity = (edge.key_from, edge.key_to, edge.kind);
            if self.edge_identities.insert(identity) {
                self.edges.push(edge.clone());
                new_edges += 1;
            }
        }
        (new_nodes, new_edges)
    }
}
