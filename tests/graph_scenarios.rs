//! End-to-end scenarios against the public engine API.

use approx::assert_relative_eq;
use nalgebra::Vector3;

use sangha_slam::engine::{BaseEngine, RobotEngine};
use sangha_slam::graph::EdgeKind;
use sangha_slam::ingest::{ArtifactObservation, ManualClosure};
use sangha_slam::io::messages::{edge_to_msg, PoseGraphMsg, PoseGraphNodeMsg};
use sangha_slam::{Covariance6, GraphEdge, Key, Point3D, PointCloud3D, Pose3D, SlamConfig};

fn key(i: u64) -> Key {
    Key::new(b'a', i)
}

fn robot_config() -> SlamConfig {
    let mut config = SlamConfig::default();
    config.nodes.translation_threshold_nodes = 0.5;
    config.nodes.translation_threshold_kf = 100.0;
    config.filtering.random_filter = false;
    config.filtering.grid_filter = false;
    config.backup.save_posegraph_backup = false;
    config.sanity.translational_sanity_check_odom = 10.0;
    config.sanity.translational_sanity_check_lc = 10.0;
    config
}

fn drive(engine: &mut RobotEngine, steps: usize, dx: f64, cloud_for: impl Fn(usize) -> Option<PointCloud3D>) {
    for i in 0..steps {
        engine.odometry_mut().push_delta(
            (i as u64 + 1) * 1_000_000_000,
            Pose3D::from_translation(dx, 0.0, 0.0),
            Covariance6::from_sigmas(0.01, 0.1),
            cloud_for(i),
        );
        engine.tick().unwrap();
    }
}

#[test]
fn s1_straight_line_odometry() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    drive(&mut engine, 10, 0.6, |_| None);

    assert_eq!(engine.graph().num_nodes(), 11);
    assert_eq!(engine.graph().edges_of_kind(EdgeKind::Odom).count(), 10);
    let last = engine.graph().last_pose().unwrap();
    assert_relative_eq!(last.translation().x, 6.0, epsilon = 1e-3);
    assert_relative_eq!(last.translation().y, 0.0, epsilon = 1e-3);
}

#[test]
fn s2_manual_loop_closure_accepts_and_optimizes() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    drive(&mut engine, 10, 0.6, |_| None);
    let k10 = engine.graph().latest_pose_key();

    engine.manual_mut().push_closure(ManualClosure {
        key_from: k10,
        key_to: key(0),
        relative_pose: Pose3D::identity(),
    });
    engine.tick().unwrap();

    assert_eq!(engine.graph().num_loop_closures(), 1);
    let optimized = engine.graph().get_pose(&k10).unwrap();
    assert!(
        optimized.translation_norm() < 1e-3,
        "k10 should collapse to the origin, is at {:.6}",
        optimized.translation_norm()
    );
}

#[test]
fn s3_loop_closure_rejected_by_fitness() {
    let mut config = robot_config();
    // Every node is a keyframe candidate and everything is proximate.
    config.nodes.translation_threshold_kf = 0.5;
    config.loop_closure.proximity_threshold = 50.0;
    config.loop_closure.distance_to_skip_recent_poses = 1.0;
    config.loop_closure.distance_before_reclosing = 0.0;
    config.icp.max_tolerable_fitness = 0.01;
    let mut engine = RobotEngine::new(config).unwrap();

    // Disjoint scan content per node: clusters far apart in space.
    drive(&mut engine, 10, 0.6, |i| {
        let mut cloud = PointCloud3D::new();
        for j in 0..30 {
            cloud.push(Point3D::new(
                1000.0 + 500.0 * i as f32 + j as f32 * 0.1,
                300.0 * i as f32,
                0.0,
            ));
        }
        Some(cloud)
    });

    // The proximity detector fires, ICP never produces an acceptable
    // alignment, no loop edge appears.
    assert_eq!(engine.graph().num_loop_closures(), 0);
    assert_eq!(engine.graph().keyed_scans().count(), 10);
}

#[test]
fn s4_sanity_rollback_restores_pre_closure_state() {
    let mut config = robot_config();
    config.sanity.translational_sanity_check_lc = 0.05;
    let mut engine = RobotEngine::new(config).unwrap();
    drive(&mut engine, 10, 0.6, |_| None);

    let k10 = engine.graph().latest_pose_key();
    let pose_before = engine.graph().last_pose().unwrap();
    let edges_before = engine.graph().num_edges();

    // A closure that would teleport k10 five-plus meters.
    engine.manual_mut().push_closure(ManualClosure {
        key_from: k10,
        key_to: key(0),
        relative_pose: Pose3D::identity(),
    });
    engine.tick().unwrap();

    assert_eq!(engine.graph().num_edges(), edges_before);
    assert_eq!(engine.graph().num_loop_closures(), 0);
    let pose_after = engine.graph().last_pose().unwrap();
    assert_relative_eq!(
        pose_before.translation_distance(&pose_after),
        0.0,
        epsilon = 1e-9
    );
}

#[test]
fn s5_artifact_resighting_constrains_landmark() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    drive(&mut engine, 8, 0.6, |_| None);

    // First sighting from near a3: landmark 1 m ahead.
    engine.artifacts_mut().push_observation(ArtifactObservation {
        stamp_ns: 3 * 1_000_000_000,
        id: "helmet-1".to_string(),
        relative_position: Vector3::new(1.0, 0.0, 0.0),
        covariance: None,
        ground_truth: None,
    });
    engine.tick().unwrap();

    let landmark = engine
        .graph()
        .nodes()
        .find(|n| n.key.is_landmark())
        .map(|n| n.key)
        .expect("landmark created");
    let first = engine.graph().get_pose(&landmark).unwrap().translation().x;

    // Second sighting from near a7: 0.5 m ahead.
    engine.artifacts_mut().push_observation(ArtifactObservation {
        stamp_ns: 7 * 1_000_000_000,
        id: "helmet-1".to_string(),
        relative_position: Vector3::new(0.5, 0.0, 0.0),
        covariance: None,
        ground_truth: None,
    });
    engine.tick().unwrap();

    assert_eq!(
        engine.graph().edges_of_kind(EdgeKind::Artifact).count(),
        2
    );
    // Second prediction: a7 at ~4.2 m plus 0.5 m.
    let second = 4.7;
    let x = engine.graph().get_pose(&landmark).unwrap().translation().x;
    let (lo, hi) = (first.min(second), first.max(second));
    assert!(
        x > lo - 1e-6 && x < hi + 1e-6,
        "landmark at {} outside [{}, {}]",
        x,
        lo,
        hi
    );
}

#[test]
fn s6_multi_robot_merge_is_disjoint_and_idempotent() {
    fn chain(prefix: u8, n: u64) -> PoseGraphMsg {
        let nodes = (0..n)
            .map(|i| PoseGraphNodeMsg {
                key: Key::new(prefix, i).raw(),
                stamp_ns: (i + 1) * 100,
                pose: Pose3D::from_translation(i as f64, 0.0, 0.0),
                id_string: String::new(),
            })
            .collect();
        let edges = (0..n - 1)
            .map(|i| {
                edge_to_msg(&GraphEdge::odometry(
                    Key::new(prefix, i),
                    Key::new(prefix, i + 1),
                    Pose3D::from_translation(1.0, 0.0, 0.0),
                    Covariance6::default(),
                ))
            })
            .collect();
        PoseGraphMsg {
            stamp_ns: n * 100,
            nodes,
            edges,
            incremental: true,
        }
    }

    let mut config = SlamConfig::default();
    config.deployment.b_is_basestation = true;
    let mut base = BaseEngine::new(config);

    base.push_pose_graph(chain(b'a', 5));
    base.tick().unwrap();
    base.push_pose_graph(chain(b'b', 5));
    base.tick().unwrap();

    assert_eq!(base.graph().num_nodes(), 10);
    let edges_after_merge = base.graph().num_edges();
    assert_eq!(edges_after_merge, 8);
    // No cross edges: every edge stays within one prefix.
    assert!(base
        .graph()
        .edges()
        .iter()
        .all(|e| e.from.prefix() == e.to.prefix()));

    // Re-sending robot A's graph verbatim changes nothing.
    base.push_pose_graph(chain(b'a', 5));
    base.tick().unwrap();
    assert_eq!(base.graph().num_nodes(), 10);
    assert_eq!(base.graph().num_edges(), edges_after_merge);
}

#[test]
fn p1_all_edge_endpoints_exist() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    drive(&mut engine, 6, 0.6, |_| None);
    engine.artifacts_mut().push_observation(ArtifactObservation {
        stamp_ns: 2 * 1_000_000_000,
        id: "rope-1".to_string(),
        relative_position: Vector3::new(0.0, 1.0, 0.0),
        covariance: None,
        ground_truth: None,
    });
    engine.tick().unwrap();

    let graph = engine.graph();
    for edge in graph.edges() {
        assert!(graph.has_key(&edge.from), "missing endpoint {}", edge.from);
        assert!(graph.has_key(&edge.to), "missing endpoint {}", edge.to);
    }
}

#[test]
fn p2_odometry_chain_reaches_every_pose_node() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    drive(&mut engine, 6, 0.6, |_| None);

    let graph = engine.graph();
    for node in graph.nodes().filter(|n| n.key.is_pose()) {
        // Walk backwards along odometry edges to the initial key.
        let mut cursor = node.key;
        while cursor != graph.initial_key() {
            let prev = cursor.prev();
            let connected = graph
                .edges_of_kind(EdgeKind::Odom)
                .any(|e| e.connects(prev, cursor));
            assert!(connected, "no odometry edge into {}", cursor);
            cursor = prev;
        }
    }
}

#[test]
fn p3_closest_key_returns_insertion_key() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    drive(&mut engine, 5, 0.6, |_| None);

    let threshold_ns = 1_000_000_000;
    for i in 1..=5u64 {
        let stamp = i * 1_000_000_000;
        assert_eq!(
            engine.graph().get_closest_key_at_time(stamp, threshold_ns),
            key(i)
        );
    }
}

#[test]
fn p4_save_load_roundtrip() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    drive(&mut engine, 5, 0.6, |i| {
        let mut cloud = PointCloud3D::new();
        for j in 0..10 {
            cloud.push(Point3D::new(i as f32, j as f32 * 0.1, 0.0));
        }
        Some(cloud)
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.zip");
    engine.save(&path).unwrap();

    let nodes = engine.graph().num_nodes();
    let scans = engine.graph().keyed_scans().count();
    let odom_edges = engine.graph().edges_of_kind(EdgeKind::Odom).count();

    let mut fresh = RobotEngine::new(robot_config()).unwrap();
    fresh.load(&path).unwrap();
    assert_eq!(fresh.graph().num_nodes(), nodes);
    assert_eq!(fresh.graph().keyed_scans().count(), scans);
    assert_eq!(fresh.graph().edges_of_kind(EdgeKind::Odom).count(), odom_edges);

    // Loaded estimates match within solver tolerance.
    let original = engine.graph().last_pose().unwrap();
    let reloaded = fresh.graph().last_pose().unwrap();
    assert!(original.translation_distance(&reloaded) < 1e-3);

    // Extending a loaded graph keeps allocating past the loaded keys.
    fresh.odometry_mut().push_delta(
        10 * 1_000_000_000,
        Pose3D::from_translation(0.6, 0.0, 0.0),
        Covariance6::from_sigmas(0.01, 0.1),
        None,
    );
    fresh.tick().unwrap();
    assert_eq!(fresh.graph().latest_pose_key(), key(6));
}

#[test]
fn boundary_exact_threshold_creates_node() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    engine.odometry_mut().push_delta(
        1_000_000_000,
        Pose3D::from_translation(0.5, 0.0, 0.0),
        Covariance6::from_sigmas(0.01, 0.1),
        None,
    );
    engine.tick().unwrap();
    assert_eq!(engine.graph().num_nodes(), 2);

    engine.odometry_mut().push_delta(
        2_000_000_000,
        Pose3D::from_translation(0.499, 0.0, 0.0),
        Covariance6::from_sigmas(0.01, 0.1),
        None,
    );
    engine.tick().unwrap();
    assert_eq!(engine.graph().num_nodes(), 2);
}

#[test]
fn boundary_remove_consecutive_odometry_refused() {
    let mut engine = RobotEngine::new(robot_config()).unwrap();
    drive(&mut engine, 3, 0.6, |_| None);
    assert!(engine.remove_factor(key(1), key(2)).is_err());
}
