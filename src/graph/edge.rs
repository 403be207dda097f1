//! Edge model for the pose graph.
//!
//! Every constraint is a `(from, to, kind, payload)` record. Kind-specific
//! payloads live in a tagged union; the optimizer is the single place
//! that matches over them.

use serde::{Deserialize, Serialize};

use crate::core::types::{Covariance6, Key, Pose3D};

/// Constraint category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Sequential odometry constraint between consecutive pose keys.
    Odom,
    /// Loop closure between non-consecutive keys.
    LoopClose,
    /// Relative observation of an artifact landmark.
    Artifact,
    /// Scalar range to a UWB anchor.
    UwbRange,
    /// Relative pose of a dropped UWB anchor.
    UwbBetween,
    /// Absolute prior on a single key.
    Prior,
    /// Gravity-direction attitude reference.
    Imu,
}

/// Kind-specific measurement payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgePayload {
    /// 6-DoF relative pose with full covariance
    /// (`Odom`, `LoopClose`, `Artifact`, `UwbBetween`).
    Between {
        delta: Pose3D,
        covariance: Covariance6,
    },
    /// Scalar range with variance (`UwbRange`).
    Range { range: f64, variance: f64 },
    /// Absolute pose prior with covariance (`Prior`).
    Prior {
        pose: Pose3D,
        covariance: Covariance6,
    },
    /// Unit gravity direction in the body frame with isotropic sigma
    /// (`Imu`).
    Attitude { direction: [f64; 3], sigma: f64 },
}

/// A single constraint in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source key. For priors this is the constrained key.
    pub from: Key,
    /// Target key. For priors this equals `from`.
    pub to: Key,
    /// Constraint category.
    pub kind: EdgeKind,
    /// Measurement payload.
    pub payload: EdgePayload,
    /// Loop factor admitted without a pairwise-consistency check on its
    /// first optimizer pass (manual closures only).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pcm_exempt_once: bool,
}

impl GraphEdge {
    /// Odometry edge between consecutive keys.
    pub fn odometry(from: Key, to: Key, delta: Pose3D, covariance: Covariance6) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::Odom,
            payload: EdgePayload::Between { delta, covariance },
            pcm_exempt_once: false,
        }
    }

    /// Loop closure edge.
    pub fn loop_closure(from: Key, to: Key, delta: Pose3D, covariance: Covariance6) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::LoopClose,
            payload: EdgePayload::Between { delta, covariance },
            pcm_exempt_once: false,
        }
    }

    /// Artifact observation edge.
    pub fn artifact(from: Key, to: Key, delta: Pose3D, covariance: Covariance6) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::Artifact,
            payload: EdgePayload::Between { delta, covariance },
            pcm_exempt_once: false,
        }
    }

    /// Dropped-anchor relative pose edge.
    pub fn uwb_between(from: Key, to: Key, delta: Pose3D, covariance: Covariance6) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::UwbBetween,
            payload: EdgePayload::Between { delta, covariance },
            pcm_exempt_once: false,
        }
    }

    /// Scalar range edge to an anchor.
    pub fn uwb_range(from: Key, to: Key, range: f64, variance: f64) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::UwbRange,
            payload: EdgePayload::Range { range, variance },
            pcm_exempt_once: false,
        }
    }

    /// Absolute prior on a key.
    pub fn prior(key: Key, pose: Pose3D, covariance: Covariance6) -> Self {
        Self {
            from: key,
            to: key,
            kind: EdgeKind::Prior,
            payload: EdgePayload::Prior { pose, covariance },
            pcm_exempt_once: false,
        }
    }

    /// Attitude reference on a key.
    pub fn imu_attitude(key: Key, direction: [f64; 3], sigma: f64) -> Self {
        Self {
            from: key,
            to: key,
            kind: EdgeKind::Imu,
            payload: EdgePayload::Attitude { direction, sigma },
            pcm_exempt_once: false,
        }
    }

    /// Relative-pose payload, if this edge carries one.
    pub fn between_payload(&self) -> Option<(&Pose3D, &Covariance6)> {
        match &self.payload {
            EdgePayload::Between { delta, covariance } => Some((delta, covariance)),
            _ => None,
        }
    }

    /// Identity used for deduplication: `(from, to, kind)`.
    pub fn identity(&self) -> (Key, Key, EdgeKind) {
        (self.from, self.to, self.kind)
    }

    /// Whether this edge connects `a` and `b` in either direction.
    pub fn connects(&self, a: Key, b: Key) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_identity() {
        let a = Key::new(b'a', 0);
        let b = Key::new(b'a', 5);
        let e = GraphEdge::loop_closure(b, a, Pose3D::identity(), Covariance6::default());
        assert_eq!(e.identity(), (b, a, EdgeKind::LoopClose));
        assert!(e.connects(a, b));
        assert!(e.connects(b, a));
        assert!(!e.connects(a, Key::new(b'a', 2)));
    }

    #[test]
    fn test_prior_self_reference() {
        let k = Key::new(b'l', 1);
        let e = GraphEdge::prior(k, Pose3D::identity(), Covariance6::default());
        assert_eq!(e.from, e.to);
        assert_eq!(e.kind, EdgeKind::Prior);
    }

    #[test]
    fn test_between_payload_access() {
        let e = GraphEdge::odometry(
            Key::new(b'a', 0),
            Key::new(b'a', 1),
            Pose3D::from_translation(1.0, 0.0, 0.0),
            Covariance6::default(),
        );
        let (delta, _) = e.between_payload().unwrap();
        assert_eq!(delta.translation().x, 1.0);

        let r = GraphEdge::uwb_range(Key::new(b'a', 0), Key::new(b'u', 0), 2.0, 0.25);
        assert!(r.between_payload().is_none());
    }
}
