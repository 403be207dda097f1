//! Thread-safe shared state between the ingest and publisher threads.
//!
//! The ingest thread is the only writer. Publishers take a short read
//! lock for the graph snapshot and odometry output; the map cloud has
//! its own mutex with try-lock drop-on-contention semantics because it
//! is visualization-only and reconstructible from keyed scans.

use std::sync::{Arc, RwLock};

use parking_lot::Mutex;

use crate::core::types::{PointCloud3D, Pose3D};
use crate::io::messages::{KeyedScanMsg, PoseGraphMsg};

/// Aggregate engine status for publishers.
#[derive(Debug, Clone, Default)]
pub struct EngineStatus {
    /// Latest pose-node estimate.
    pub last_pose: Pose3D,
    /// Continuous odometry output (last node ∘ accumulated drift).
    pub odometry_pose: Pose3D,
    /// Node count.
    pub num_nodes: usize,
    /// Edge count.
    pub num_edges: usize,
    /// Accepted loop closures.
    pub num_loop_closures: usize,
    /// Stamp of the last processed tick, nanoseconds.
    pub last_update_ns: u64,
}

/// State shared across threads.
#[derive(Debug, Default)]
pub struct SharedState {
    /// Current engine status.
    pub status: EngineStatus,
    /// Latest full graph snapshot for the graph topic.
    pub graph_snapshot: Option<PoseGraphMsg>,
    /// Set by the ingest thread whenever the graph changed.
    pub graph_dirty: bool,
    /// Newly keyed scans awaiting publication. Enqueued only after the
    /// owning node is part of the snapshot, so consumers always see the
    /// node first.
    pub keyed_scan_queue: Vec<KeyedScanMsg>,
}

impl SharedState {
    /// Create default shared state.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Handle shared between threads.
pub type SharedStateHandle = Arc<RwLock<SharedState>>;

/// Create a fresh shared-state handle.
pub fn create_shared_state() -> SharedStateHandle {
    Arc::new(RwLock::new(SharedState::new()))
}

/// Handle to the visualization map cloud.
pub type MapCloudHandle = Arc<Mutex<PointCloud3D>>;

/// Create an empty map-cloud handle.
pub fn create_map_cloud() -> MapCloudHandle {
    Arc::new(Mutex::new(PointCloud3D::new()))
}

/// Replace the map cloud if the mutex is free.
///
/// Returns false (dropping the update with a warning) when the
/// publisher holds the lock.
pub fn try_update_map(map: &MapCloudHandle, cloud: PointCloud3D) -> bool {
    match map.try_lock() {
        Some(mut guard) => {
            *guard = cloud;
            true
        }
        None => {
            log::warn!("map cloud busy, dropping update");
            false
        }
    }
}
