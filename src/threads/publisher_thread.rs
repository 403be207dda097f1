//! Publisher thread: read-only fan-out of graph, map, and odometry.
//!
//! Takes a short read lock on the shared state each cycle and forwards
//! snapshots to whatever transport the deployment wires up. The map
//! cloud lock is held only long enough to clone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::core::types::{PointCloud3D, Pose3D};
use crate::io::messages::{KeyedScanMsg, PoseGraphMsg};
use crate::state::{MapCloudHandle, SharedStateHandle};

/// Output channels for the published topics.
#[derive(Clone)]
pub struct PublisherOutputs {
    /// Graph topic: full snapshots, sent when the graph changed.
    pub graph_tx: Sender<PoseGraphMsg>,
    /// Keyed scan topic: sent after the owning node's snapshot.
    pub scan_tx: Sender<KeyedScanMsg>,
    /// Map topic: best-effort world cloud.
    pub map_tx: Sender<PointCloud3D>,
    /// Odometry output topic: every cycle.
    pub odom_tx: Sender<Pose3D>,
}

/// Handle to the running publisher thread.
pub struct PublisherThread {
    handle: JoinHandle<()>,
}

impl PublisherThread {
    /// Spawn the thread.
    pub fn spawn(
        shared: SharedStateHandle,
        map: MapCloudHandle,
        outputs: PublisherOutputs,
        running: Arc<AtomicBool>,
        publish_rate_hz: f64,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("publisher".into())
            .spawn(move || {
                run_publisher_loop(shared, map, outputs, running, publish_rate_hz);
            })
            .expect("failed to spawn publisher thread");
        Self { handle }
    }

    /// Wait for the thread to finish.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_publisher_loop(
    shared: SharedStateHandle,
    map: MapCloudHandle,
    outputs: PublisherOutputs,
    running: Arc<AtomicBool>,
    publish_rate_hz: f64,
) {
    log::info!("publisher thread starting at {} Hz", publish_rate_hz);
    let period = Duration::from_secs_f64(1.0 / publish_rate_hz.max(0.1));
    let mut last_map_len = usize::MAX;

    while running.load(Ordering::Relaxed) {
        thread::sleep(period);

        let (graph_msg, scans, odom_pose) = {
            let mut state = shared.write().unwrap();
            let msg = if state.graph_dirty {
                state.graph_dirty = false;
                state.graph_snapshot.clone()
            } else {
                None
            };
            let scans = std::mem::take(&mut state.keyed_scan_queue);
            (msg, scans, state.status.odometry_pose)
        };

        // Graph before scans: a scan is only observable after its node.
        if let Some(msg) = graph_msg {
            if outputs.graph_tx.try_send(msg).is_err() {
                log::warn!("graph topic backpressure, dropping snapshot");
            }
        }
        for scan in scans {
            let _ = outputs.scan_tx.try_send(scan);
        }
        let _ = outputs.odom_tx.try_send(odom_pose);

        // Map publication is best-effort; only forward when it changed.
        let cloud = map.lock().clone();
        if cloud.len() != last_map_len {
            last_map_len = cloud.len();
            let _ = outputs.map_tx.try_send(cloud);
        }
    }
    log::info!("publisher thread stopping");
}
