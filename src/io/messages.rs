//! Wire message types for graph and scan streaming.
//!
//! These are the structures exchanged between robots and the base
//! station, and between the engine and visualization clients. Edge
//! kinds are flattened into one message carrying every optional field,
//! matching the single edge message of the transport layer.

use serde::{Deserialize, Serialize};

use crate::core::types::{Covariance6, Key, PointCloud3D, Pose3D};
use crate::error::{Result, SlamError};
use crate::graph::{EdgeKind, EdgePayload, GraphEdge};

/// Edge type tags on the wire.
pub mod edge_type {
    pub const ODOM: u8 = 0;
    pub const LOOPCLOSE: u8 = 1;
    pub const ARTIFACT: u8 = 2;
    pub const UWB_RANGE: u8 = 3;
    pub const UWB_BETWEEN: u8 = 4;
    pub const IMU: u8 = 5;
    pub const PRIOR: u8 = 6;
}

/// One graph node on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseGraphNodeMsg {
    /// Raw key value.
    pub key: u64,
    /// Creation stamp, nanoseconds.
    pub stamp_ns: u64,
    /// World-frame pose estimate.
    pub pose: Pose3D,
    /// External identifier for artifact/anchor nodes, empty otherwise.
    #[serde(default)]
    pub id_string: String,
}

/// One graph edge on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseGraphEdgeMsg {
    /// Raw source key.
    pub key_from: u64,
    /// Raw target key (equals `key_from` for priors and IMU factors).
    pub key_to: u64,
    /// Edge type tag (see [`edge_type`]).
    pub kind: u8,
    /// Relative or absolute pose, when the kind carries one.
    #[serde(default)]
    pub pose: Option<Pose3D>,
    /// 6×6 covariance, when the kind carries one.
    #[serde(default)]
    pub covariance: Option<Covariance6>,
    /// Scalar range (UWB range edges).
    #[serde(default)]
    pub range: f64,
    /// Range standard deviation (UWB range edges).
    #[serde(default)]
    pub range_error: f64,
    /// Attitude direction (IMU edges).
    #[serde(default)]
    pub direction: Option<[f64; 3]>,
    /// Attitude sigma (IMU edges).
    #[serde(default)]
    pub sigma: f64,
}

/// A full or incremental graph snapshot on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseGraphMsg {
    /// Stamp of the newest node, nanoseconds.
    pub stamp_ns: u64,
    /// Graph nodes.
    pub nodes: Vec<PoseGraphNodeMsg>,
    /// Graph edges.
    pub edges: Vec<PoseGraphEdgeMsg>,
    /// When false the receiver clears and rebuilds; otherwise merges.
    pub incremental: bool,
}

/// A keyed scan on the wire. Must only be published after the node for
/// `key` is observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedScanMsg {
    /// Raw key of the pose node this scan belongs to.
    pub key: u64,
    /// The scan itself.
    pub scan: PointCloud3D,
}

/// Convert a graph edge to its wire form.
pub fn edge_to_msg(edge: &GraphEdge) -> PoseGraphEdgeMsg {
    let mut msg = PoseGraphEdgeMsg {
        key_from: edge.from.raw(),
        key_to: edge.to.raw(),
        kind: match edge.kind {
            EdgeKind::Odom => edge_type::ODOM,
            EdgeKind::LoopClose => edge_type::LOOPCLOSE,
            EdgeKind::Artifact => edge_type::ARTIFACT,
            EdgeKind::UwbRange => edge_type::UWB_RANGE,
            EdgeKind::UwbBetween => edge_type::UWB_BETWEEN,
            EdgeKind::Imu => edge_type::IMU,
            EdgeKind::Prior => edge_type::PRIOR,
        },
        pose: None,
        covariance: None,
        range: 0.0,
        range_error: 0.0,
        direction: None,
        sigma: 0.0,
    };
    match &edge.payload {
        EdgePayload::Between { delta, covariance } => {
            msg.pose = Some(*delta);
            msg.covariance = Some(*covariance);
        }
        EdgePayload::Prior { pose, covariance } => {
            msg.pose = Some(*pose);
            msg.covariance = Some(*covariance);
        }
        EdgePayload::Range { range, variance } => {
            msg.range = *range;
            msg.range_error = variance.sqrt();
        }
        EdgePayload::Attitude { direction, sigma } => {
            msg.direction = Some(*direction);
            msg.sigma = *sigma;
        }
    }
    msg
}

/// Rebuild a graph edge from its wire form.
pub fn edge_from_msg(msg: &PoseGraphEdgeMsg) -> Result<GraphEdge> {
    let from = Key::from_raw(msg.key_from);
    let to = Key::from_raw(msg.key_to);
    let between = |kind: EdgeKind| -> Result<GraphEdge> {
        let delta = msg
            .pose
            .ok_or_else(|| SlamError::Persistence("between edge missing pose".into()))?;
        let covariance = msg.covariance.unwrap_or_default();
        Ok(GraphEdge {
            from,
            to,
            kind,
            payload: EdgePayload::Between { delta, covariance },
            pcm_exempt_once: false,
        })
    };
    match msg.kind {
        edge_type::ODOM => between(EdgeKind::Odom),
        edge_type::LOOPCLOSE => between(EdgeKind::LoopClose),
        edge_type::ARTIFACT => between(EdgeKind::Artifact),
        edge_type::UWB_BETWEEN => between(EdgeKind::UwbBetween),
        edge_type::UWB_RANGE => Ok(GraphEdge::uwb_range(
            from,
            to,
            msg.range,
            msg.range_error * msg.range_error,
        )),
        edge_type::IMU => Ok(GraphEdge::imu_attitude(
            from,
            msg.direction.unwrap_or([0.0, 0.0, 1.0]),
            if msg.sigma > 0.0 { msg.sigma } else { 0.1 },
        )),
        edge_type::PRIOR => {
            let pose = msg
                .pose
                .ok_or_else(|| SlamError::Persistence("prior edge missing pose".into()))?;
            Ok(GraphEdge::prior(from, pose, msg.covariance.unwrap_or_default()))
        }
        other => Err(SlamError::Persistence(format!(
            "unknown edge type tag {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_between_edge_roundtrip() {
        let e = GraphEdge::loop_closure(
            Key::new(b'a', 8),
            Key::new(b'a', 1),
            Pose3D::from_translation(0.5, 0.0, 0.0),
            Covariance6::from_sigmas(0.01, 0.05),
        );
        let back = edge_from_msg(&edge_to_msg(&e)).unwrap();
        assert_eq!(back.identity(), e.identity());
        assert_eq!(back.between_payload().unwrap().0, e.between_payload().unwrap().0);
    }

    #[test]
    fn test_range_edge_roundtrip() {
        let e = GraphEdge::uwb_range(Key::new(b'a', 2), Key::new(b'u', 0), 3.5, 0.25);
        let msg = edge_to_msg(&e);
        assert_eq!(msg.range, 3.5);
        assert!((msg.range_error - 0.5).abs() < 1e-12);
        let back = edge_from_msg(&msg).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let msg = PoseGraphEdgeMsg {
            key_from: 0,
            key_to: 0,
            kind: 99,
            pose: None,
            covariance: None,
            range: 0.0,
            range_error: 0.0,
            direction: None,
            sigma: 0.0,
        };
        assert!(edge_from_msg(&msg).is_err());
    }
}
