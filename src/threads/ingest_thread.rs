//! Ingest thread: the single writer over the pose graph.
//!
//! Driven by a periodic tick. Each cycle drains the sensor channel
//! into the engine's handlers in arrival order, runs one engine tick,
//! executes queued commands, and refreshes the shared snapshot. All
//! graph mutations happen here and nowhere else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver};

use crate::core::types::{Covariance6, PointCloud3D, Pose3D};
use crate::engine::Engine;
use crate::ingest::{ArtifactObservation, ImuAttitude, ManualClosure, UwbObservation};
use crate::io::messages::{KeyedScanMsg, PoseGraphMsg};
use crate::state::{try_update_map, CommandReceiver, MapCloudHandle, SharedStateHandle};

/// One sensor observation on its way into the engine.
#[derive(Debug)]
pub enum SensorEvent {
    /// Incremental odometry, optionally carrying a scan.
    Odometry {
        /// Stamp, nanoseconds.
        stamp_ns: u64,
        /// Relative transform since the previous sample.
        delta: Pose3D,
        /// Covariance of the transform.
        covariance: Covariance6,
        /// Scan captured with this sample.
        cloud: Option<PointCloud3D>,
    },
    /// Artifact or april-tag sighting.
    Artifact(ArtifactObservation),
    /// UWB range or drop observation.
    Uwb(UwbObservation),
    /// IMU attitude measurement.
    Imu(ImuAttitude),
    /// Operator loop closure.
    ManualClosure(ManualClosure),
    /// Fast graph from a robot (base station only).
    PoseGraph(PoseGraphMsg),
    /// Keyed scan from a robot (base station only).
    KeyedScan(KeyedScanMsg),
}

/// Handle to the running ingest thread.
pub struct IngestThread {
    handle: JoinHandle<()>,
}

impl IngestThread {
    /// Spawn the thread.
    pub fn spawn(
        engine: Engine,
        shared: SharedStateHandle,
        map: MapCloudHandle,
        sensor_rx: Receiver<SensorEvent>,
        command_rx: CommandReceiver,
        running: Arc<AtomicBool>,
        update_rate_hz: f64,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("ingest".into())
            .spawn(move || {
                run_ingest_loop(
                    engine,
                    shared,
                    map,
                    sensor_rx,
                    command_rx,
                    running,
                    update_rate_hz,
                );
            })
            .expect("failed to spawn ingest thread");
        Self { handle }
    }

    /// Wait for the thread to finish.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_ingest_loop(
    mut engine: Engine,
    shared: SharedStateHandle,
    map: MapCloudHandle,
    sensor_rx: Receiver<SensorEvent>,
    command_rx: CommandReceiver,
    running: Arc<AtomicBool>,
    update_rate_hz: f64,
) {
    log::info!("ingest thread starting at {} Hz", update_rate_hz);
    let period = Duration::from_secs_f64(1.0 / update_rate_hz.max(0.1));
    let ticker = tick(period);
    let mut last_edge_count = 0usize;
    let mut last_scan_count = 0usize;

    while running.load(Ordering::Relaxed) {
        select! {
            recv(ticker) -> _ => {}
            recv(command_rx) -> msg => {
                if let Ok(req) = msg {
                    let result = engine.handle_command(&req.command);
                    let _ = req.response_tx.send(result);
                }
                continue;
            }
        }

        // Drain sensors in arrival order.
        for event in sensor_rx.try_iter() {
            route_event(&mut engine, event);
        }

        if let Err(e) = engine.tick() {
            // Solver failures were already rolled back; keep ticking.
            log::error!("ingest tick error: {}", e);
        }

        // Refresh the shared snapshot.
        let graph = engine.graph();
        let edge_count = graph.num_edges();
        let scan_count = graph.keyed_scans().count();
        let graph_changed = edge_count != last_edge_count;
        {
            let mut state = shared.write().unwrap();
            state.status.num_nodes = graph.num_nodes();
            state.status.num_edges = edge_count;
            state.status.num_loop_closures = graph.num_loop_closures();
            if let Ok(pose) = graph.last_pose() {
                state.status.last_pose = pose;
            }
            if let Engine::Robot(robot) = &engine {
                if let Ok(pose) = robot.odometry_output() {
                    state.status.odometry_pose = pose;
                }
            }
            if graph_changed {
                state.graph_snapshot = Some(graph.to_msg());
                state.graph_dirty = true;
            }
        }
        if let Engine::Robot(robot) = &mut engine {
            let scans = robot.take_new_keyed_scans();
            if !scans.is_empty() {
                shared.write().unwrap().keyed_scan_queue.extend(scans);
            }
        }
        let graph = engine.graph();

        // The map is rebuilt only when its inputs changed, and dropped
        // on contention (visualization-only contract).
        if graph_changed || scan_count != last_scan_count {
            if let Ok(cloud) = graph.maximum_likelihood_points() {
                try_update_map(&map, cloud);
            }
        }
        last_edge_count = edge_count;
        last_scan_count = scan_count;
    }
    log::info!("ingest thread stopping");
}

fn route_event(engine: &mut Engine, event: SensorEvent) {
    match (engine, event) {
        (
            Engine::Robot(e),
            SensorEvent::Odometry {
                stamp_ns,
                delta,
                covariance,
                cloud,
            },
        ) => e.odometry_mut().push_delta(stamp_ns, delta, covariance, cloud),
        (Engine::Robot(e), SensorEvent::Artifact(obs)) => e.artifacts_mut().push_observation(obs),
        (Engine::Robot(e), SensorEvent::Uwb(obs)) => e.uwb_mut().push_observation(obs),
        (Engine::Robot(e), SensorEvent::Imu(att)) => e.imu_mut().push_attitude(att),
        (Engine::Robot(e), SensorEvent::ManualClosure(mc)) => e.manual_mut().push_closure(mc),
        (Engine::Base(e), SensorEvent::ManualClosure(mc)) => e.manual_mut().push_closure(mc),
        (Engine::Base(e), SensorEvent::PoseGraph(msg)) => e.push_pose_graph(msg),
        (Engine::Base(e), SensorEvent::KeyedScan(msg)) => e.push_keyed_scan(msg),
        (_, event) => {
            log::warn!("event not supported by this deployment: {:?}", event_name(&event));
        }
    }
}

fn event_name(event: &SensorEvent) -> &'static str {
    match event {
        SensorEvent::Odometry { .. } => "odometry",
        SensorEvent::Artifact(_) => "artifact",
        SensorEvent::Uwb(_) => "uwb",
        SensorEvent::Imu(_) => "imu",
        SensorEvent::ManualClosure(_) => "manual_closure",
        SensorEvent::PoseGraph(_) => "pose_graph",
        SensorEvent::KeyedScan(_) => "keyed_scan",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlamConfig;
    use crate::engine::RobotEngine;
    use crate::state::{create_command_channel, create_map_cloud, create_shared_state};
    use crossbeam_channel::unbounded;

    fn robot_config() -> SlamConfig {
        let mut config = SlamConfig::default();
        config.nodes.translation_threshold_nodes = 0.5;
        config.backup.save_posegraph_backup = false;
        config.sanity.translational_sanity_check_odom = 10.0;
        config
    }

    #[test]
    fn test_ingest_thread_processes_odometry() {
        let engine = Engine::Robot(Box::new(RobotEngine::new(robot_config()).unwrap()));
        let shared = create_shared_state();
        let map = create_map_cloud();
        let (sensor_tx, sensor_rx) = unbounded();
        let (_cmd_tx, cmd_rx) = create_command_channel();
        let running = Arc::new(AtomicBool::new(true));

        let thread = IngestThread::spawn(
            engine,
            shared.clone(),
            map,
            sensor_rx,
            cmd_rx,
            running.clone(),
            100.0,
        );

        for i in 0..4u64 {
            sensor_tx
                .send(SensorEvent::Odometry {
                    stamp_ns: (i + 1) * 1_000_000_000,
                    delta: Pose3D::from_translation(0.6, 0.0, 0.0),
                    covariance: Covariance6::from_sigmas(0.01, 0.1),
                    cloud: None,
                })
                .unwrap();
        }

        // Give the 100 Hz loop a few cycles.
        std::thread::sleep(Duration::from_millis(200));
        running.store(false, Ordering::Relaxed);
        thread.join().unwrap();

        let state = shared.read().unwrap();
        assert_eq!(state.status.num_nodes, 5);
        assert!(state.graph_snapshot.is_some());
    }
}
