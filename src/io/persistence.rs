//! Zip-bundled graph persistence.
//!
//! One archive holds the whole recoverable state:
//!
//! - `graph.g2o` — factor graph and values in the 3-D dataset format
//! - `keys.csv` — `key, pcd_filename, stamp_ns` per keyed scan
//! - `odometry_edges.csv`, `loop_edges.csv` — `from_key, to_key` pairs
//! - `pc_<n>.pcd` — one binary point cloud per keyed scan
//!
//! Loading rebuilds nodes, keyed scans, both edge manifests, puts a
//! fresh prior on the first key, and reinitializes the optimizer.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;

use crate::core::types::{Covariance6, Key, Pose3D};
use crate::error::{Result, SlamError};
use crate::graph::{EdgeKind, GraphEdge, PoseGraph};
use crate::optimizer::RobustOptimizer;

use super::g2o::{self, G2oEdge, G2oVertex};
use super::pcd;

const GRAPH_ENTRY: &str = "graph.g2o";
const KEYS_ENTRY: &str = "keys.csv";
const ODOM_EDGES_ENTRY: &str = "odometry_edges.csv";
const LOOP_EDGES_ENTRY: &str = "loop_edges.csv";

/// Write the graph as a bundle at `path`.
///
/// In-memory state is never mutated by a save; an I/O failure leaves
/// any partially written file behind and surfaces as an error.
pub fn save_bundle(graph: &PoseGraph, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    // graph.g2o: every node as a vertex, every between-factor as an edge.
    let vertices: Vec<G2oVertex> = graph
        .nodes()
        .map(|n| G2oVertex {
            id: n.key.raw(),
            pose: n.pose,
        })
        .collect();
    let edges: Vec<G2oEdge> = graph
        .edges()
        .iter()
        .filter_map(|e| {
            e.between_payload().map(|(delta, cov)| G2oEdge {
                from: e.from.raw(),
                to: e.to.raw(),
                delta: *delta,
                covariance: *cov,
            })
        })
        .collect();
    zip.start_file(GRAPH_ENTRY, options)?;
    zip.write_all(g2o::write_g2o(&vertices, &edges).as_bytes())?;

    // keys.csv + one pcd per keyed scan, in insertion (key) order.
    let mut keys_writer = csv::Writer::from_writer(Vec::new());
    for (i, (key, scan)) in graph.keyed_scans().enumerate() {
        let pcd_name = format!("pc_{}.pcd", i);
        let stamp = graph.stamp_of(key).unwrap_or(0);
        keys_writer
            .write_record([key.raw().to_string(), pcd_name.clone(), stamp.to_string()])?;

        let mut pcd_bytes = Vec::new();
        pcd::write_pcd(scan, &mut pcd_bytes)?;
        zip.start_file(pcd_name, options)?;
        zip.write_all(&pcd_bytes)?;
    }
    let keys_bytes = keys_writer
        .into_inner()
        .map_err(|e| SlamError::Persistence(e.to_string()))?;
    zip.start_file(KEYS_ENTRY, options)?;
    zip.write_all(&keys_bytes)?;

    // Edge manifests.
    for (entry, kind) in [
        (ODOM_EDGES_ENTRY, EdgeKind::Odom),
        (LOOP_EDGES_ENTRY, EdgeKind::LoopClose),
    ] {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for e in graph.edges_of_kind(kind) {
            writer.write_record([e.from.raw().to_string(), e.to.raw().to_string()])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| SlamError::Persistence(e.to_string()))?;
        zip.start_file(entry, options)?;
        zip.write_all(&bytes)?;
    }

    zip.finish()?;
    log::info!("saved pose graph bundle to {}", path.display());
    Ok(())
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| SlamError::Persistence(format!("missing bundle entry {}: {}", name, e)))?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn read_pairs(bytes: &[u8]) -> Result<Vec<(Key, Key)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(bytes);
    let mut pairs = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() < 2 {
            continue;
        }
        let from = record[0]
            .parse::<u64>()
            .map_err(|e| SlamError::Persistence(format!("bad edge key: {}", e)))?;
        let to = record[1]
            .parse::<u64>()
            .map_err(|e| SlamError::Persistence(format!("bad edge key: {}", e)))?;
        pairs.push((Key::from_raw(from), Key::from_raw(to)));
    }
    Ok(pairs)
}

/// Load a bundle, replacing the graph and reinitializing the optimizer.
///
/// On any failure the load call fails; the caller decides whether to
/// retry or fall back to a snapshot (in-memory state has already been
/// erased at that point, so a failed load is a fatal event for the
/// graph it replaced).
pub fn load_bundle(
    path: &Path,
    graph: &mut PoseGraph,
    optimizer: &mut RobustOptimizer,
    initial_covariance: &Covariance6,
) -> Result<()> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let g2o_bytes = read_entry(&mut archive, GRAPH_ENTRY)?;
    let parsed = g2o::parse_g2o(
        std::str::from_utf8(&g2o_bytes)
            .map_err(|_| SlamError::Persistence("graph.g2o is not utf-8".to_string()))?,
    )?;
    if parsed.vertices.is_empty() {
        return Err(SlamError::Persistence("bundle has no vertices".to_string()));
    }

    // keys.csv rows: key, pcd filename, stamp.
    let keys_bytes = read_entry(&mut archive, KEYS_ENTRY)?;
    let mut keyed_rows: Vec<(Key, String, u64)> = Vec::new();
    {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(keys_bytes.as_slice());
        for record in reader.records() {
            let record = record?;
            if record.len() < 3 {
                continue;
            }
            let key = Key::from_raw(
                record[0]
                    .parse::<u64>()
                    .map_err(|e| SlamError::Persistence(format!("bad key: {}", e)))?,
            );
            let stamp = record[2]
                .parse::<u64>()
                .map_err(|e| SlamError::Persistence(format!("bad stamp: {}", e)))?;
            keyed_rows.push((key, record[1].to_string(), stamp));
        }
    }

    let odom_pairs = read_pairs(&read_entry(&mut archive, ODOM_EDGES_ENTRY)?)?;
    let loop_pairs = read_pairs(&read_entry(&mut archive, LOOP_EDGES_ENTRY)?)?;

    // Scans, loaded before any state is erased.
    let mut scans = Vec::with_capacity(keyed_rows.len());
    for (key, pcd_name, stamp) in &keyed_rows {
        let pcd_bytes = read_entry(&mut archive, pcd_name)?;
        let cloud = pcd::read_pcd(&mut pcd_bytes.as_slice())?;
        scans.push((*key, *stamp, cloud));
    }

    // Everything parsed; rebuild.
    graph.erase();
    optimizer.reset();

    let stamps: BTreeMap<Key, u64> = scans.iter().map(|(k, s, _)| (*k, *s)).collect();
    for v in &parsed.vertices {
        let key = Key::from_raw(v.id);
        graph.insert_node_unstamped(key, v.pose, stamps.get(&key).copied())?;
    }
    for (key, _, cloud) in scans {
        graph.insert_keyed_scan(key, cloud)?;
    }

    // Classify between-edges through the manifests; landmark and anchor
    // targets keep their own kinds.
    let odom_set: HashSet<(Key, Key)> = odom_pairs.into_iter().collect();
    let loop_set: HashSet<(Key, Key)> = loop_pairs.into_iter().collect();
    let mut factors: Vec<GraphEdge> = Vec::with_capacity(parsed.edges.len() + 1);
    for e in &parsed.edges {
        let from = Key::from_raw(e.from);
        let to = Key::from_raw(e.to);
        let pair = (from, to);
        let edge = if odom_set.contains(&pair) {
            GraphEdge::odometry(from, to, e.delta, e.covariance)
        } else if loop_set.contains(&pair) {
            GraphEdge::loop_closure(from, to, e.delta, e.covariance)
        } else if to.is_landmark() || from.is_landmark() {
            GraphEdge::artifact(from, to, e.delta, e.covariance)
        } else if to.is_uwb() || from.is_uwb() {
            GraphEdge::uwb_between(from, to, e.delta, e.covariance)
        } else {
            log::warn!("unclassified bundle edge {} -> {}, treating as loop", from, to);
            GraphEdge::loop_closure(from, to, e.delta, e.covariance)
        };
        factors.push(edge);
    }

    // Fresh prior on the first key of the loaded graph.
    let first_key = Key::from_raw(parsed.vertices[0].id);
    let first_pose = graph.get_pose(&first_key)?;
    factors.push(GraphEdge::prior(first_key, first_pose, *initial_covariance));
    graph.set_initial_key(first_key);

    let values: Vec<(Key, Pose3D)> = graph.nodes().map(|n| (n.key, n.pose)).collect();
    graph.apply_committed(factors.clone(), &BTreeMap::new());
    optimizer.update(factors, values).map_err(|e| {
        SlamError::Persistence(format!("optimizer reinitialization failed: {}", e))
    })?;
    graph.swap_values(optimizer.calculate_estimate());

    log::info!(
        "loaded pose graph bundle from {} ({} nodes, {} edges)",
        path.display(),
        graph.num_nodes(),
        graph.num_edges()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Point3D, PointCloud3D};
    use crate::graph::SanityGate;

    fn key(i: u64) -> Key {
        Key::new(b'a', i)
    }

    fn pose_x(x: f64) -> Pose3D {
        Pose3D::from_translation(x, 0.0, 0.0)
    }

    fn scan(seed: f32) -> PointCloud3D {
        let mut cloud = PointCloud3D::new();
        for i in 0..20 {
            cloud.push(Point3D::new(seed + i as f32 * 0.1, seed, 0.0));
        }
        cloud
    }

    fn build_world() -> (PoseGraph, RobustOptimizer) {
        let mut graph = PoseGraph::new();
        graph
            .initialize(
                key(0),
                Pose3D::identity(),
                Covariance6::from_sigmas(0.001, 0.001),
                1_000,
            )
            .unwrap();
        graph.insert_keyed_scan(key(0), scan(0.0)).unwrap();
        let mut optimizer = RobustOptimizer::new(Default::default());
        let gate = SanityGate::new(Default::default());
        gate.guarded_commit(&mut graph, &mut optimizer, 10.0).unwrap();
        for i in 1..=4u64 {
            let last = graph.get_pose(&key(i - 1)).unwrap();
            graph
                .insert_node(key(i), last.compose(&pose_x(1.0)), 1_000 + i * 500, None)
                .unwrap();
            graph
                .track_factor(GraphEdge::odometry(
                    key(i - 1),
                    key(i),
                    pose_x(1.0),
                    Covariance6::from_sigmas(0.01, 0.1),
                ))
                .unwrap();
            gate.guarded_commit(&mut graph, &mut optimizer, 10.0).unwrap();
            if i % 2 == 0 {
                graph.insert_keyed_scan(key(i), scan(i as f32)).unwrap();
            }
        }
        // One loop edge so both manifests are non-trivial.
        graph
            .track_factor(GraphEdge::loop_closure(
                key(4),
                key(0),
                pose_x(-4.0),
                Covariance6::from_sigmas(0.01, 0.05),
            ))
            .unwrap();
        gate.guarded_commit(&mut graph, &mut optimizer, 10.0).unwrap();
        (graph, optimizer)
    }

    #[test]
    fn test_save_load_restores_structure() {
        let (graph, _) = build_world();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        save_bundle(&graph, &path).unwrap();

        let mut loaded = PoseGraph::new();
        let mut optimizer = RobustOptimizer::new(Default::default());
        load_bundle(
            &path,
            &mut loaded,
            &mut optimizer,
            &Covariance6::from_sigmas(0.01, 0.01),
        )
        .unwrap();

        assert_eq!(loaded.num_nodes(), graph.num_nodes());
        assert_eq!(loaded.keyed_scans().count(), 3);
        assert_eq!(
            loaded.edges_of_kind(EdgeKind::Odom).count(),
            graph.edges_of_kind(EdgeKind::Odom).count()
        );
        assert_eq!(loaded.num_loop_closures(), 1);
        // Fresh prior on the first key.
        assert_eq!(loaded.edges_of_kind(EdgeKind::Prior).count(), 1);
        assert_eq!(loaded.initial_key(), key(0));
        assert_eq!(loaded.latest_pose_key(), key(4));
        // Stamps of keyed scans survive.
        assert_eq!(loaded.stamp_of(&key(2)), Some(2_000));
    }

    #[test]
    fn test_roundtrip_bundle_is_stable() {
        let (graph, _) = build_world();
        let dir = tempfile::tempdir().unwrap();
        let path1 = dir.path().join("first.zip");
        let path2 = dir.path().join("second.zip");
        save_bundle(&graph, &path1).unwrap();

        let mut loaded = PoseGraph::new();
        let mut optimizer = RobustOptimizer::new(Default::default());
        load_bundle(
            &path1,
            &mut loaded,
            &mut optimizer,
            &Covariance6::from_sigmas(0.01, 0.01),
        )
        .unwrap();
        save_bundle(&loaded, &path2).unwrap();

        // Same entries, same manifest bytes (archive metadata may differ).
        for entry in [KEYS_ENTRY, ODOM_EDGES_ENTRY, LOOP_EDGES_ENTRY] {
            let mut a1 = zip::ZipArchive::new(File::open(&path1).unwrap()).unwrap();
            let mut a2 = zip::ZipArchive::new(File::open(&path2).unwrap()).unwrap();
            let b1 = read_entry(&mut a1, entry).unwrap();
            let b2 = read_entry(&mut a2, entry).unwrap();
            assert_eq!(b1, b2, "entry {} differs", entry);
        }
    }

    #[test]
    fn test_load_missing_file_fails() {
        let mut graph = PoseGraph::new();
        let mut optimizer = RobustOptimizer::new(Default::default());
        let err = load_bundle(
            Path::new("/nonexistent/bundle.zip"),
            &mut graph,
            &mut optimizer,
            &Covariance6::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SlamError::Persistence(_)));
    }
}
