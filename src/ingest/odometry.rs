//! Odometry accumulation and node-creation policy.
//!
//! Relative transforms stream in at sensor rate; a new pose node is
//! emitted only when the accumulated motion since the last node crosses
//! the translation or rotation threshold. A larger keyframe threshold
//! decides whether the node's scan becomes loop-closure eligible.

use std::collections::VecDeque;

use crate::config::NodePolicyConfig;
use crate::core::types::{Covariance6, PointCloud3D, Pose3D};

/// Trajectory history bound for time-delta lookups.
const TRAJECTORY_CAPACITY: usize = 4096;

/// One emitted node-creation event.
#[derive(Debug, Clone)]
pub struct OdomFactor {
    /// Stamp of the motion that crossed the threshold.
    pub stamp_ns: u64,
    /// Accumulated relative transform since the previous node.
    pub delta: Pose3D,
    /// Covariance of the accumulated transform.
    pub covariance: Covariance6,
    /// Scan captured at this node, if the sensor attached one.
    pub cloud: Option<PointCloud3D>,
    /// Whether this node is a keyframe candidate for loop closure.
    pub is_keyframe: bool,
}

/// The odometry factor source.
#[derive(Debug)]
pub struct OdometryHandler {
    policy: NodePolicyConfig,
    accumulated: Pose3D,
    accumulated_kf: Pose3D,
    pending: Vec<OdomFactor>,
    /// Cumulative pose log for delta-between-times queries.
    cumulative: Pose3D,
    trajectory: VecDeque<(u64, Pose3D)>,
}

impl OdometryHandler {
    /// Create a handler with the given node policy.
    pub fn new(policy: NodePolicyConfig) -> Self {
        Self {
            policy,
            accumulated: Pose3D::identity(),
            accumulated_kf: Pose3D::identity(),
            pending: Vec::new(),
            cumulative: Pose3D::identity(),
            trajectory: VecDeque::new(),
        }
    }

    /// Feed one incremental transform from the odometry source.
    pub fn push_delta(
        &mut self,
        stamp_ns: u64,
        delta: Pose3D,
        covariance: Covariance6,
        cloud: Option<PointCloud3D>,
    ) {
        self.cumulative = self.cumulative.compose(&delta);
        self.trajectory.push_back((stamp_ns, self.cumulative));
        if self.trajectory.len() > TRAJECTORY_CAPACITY {
            self.trajectory.pop_front();
        }

        self.accumulated = self.accumulated.compose(&delta);
        self.accumulated_kf = self.accumulated_kf.compose(&delta);

        let translation_hit =
            self.accumulated.translation_norm() >= self.policy.translation_threshold_nodes;
        let rotation_hit =
            self.accumulated.rotation_angle() >= self.policy.rotation_threshold_nodes;
        if !translation_hit && !rotation_hit {
            return;
        }

        let is_keyframe = cloud.is_some()
            && self.accumulated_kf.translation_norm() >= self.policy.translation_threshold_kf;
        if is_keyframe {
            self.accumulated_kf = Pose3D::identity();
        }
        self.pending.push(OdomFactor {
            stamp_ns,
            delta: self.accumulated,
            covariance,
            cloud,
            is_keyframe,
        });
        self.accumulated = Pose3D::identity();
    }

    /// Drain the node-creation events accumulated since the last tick.
    pub fn take_data(&mut self) -> Vec<OdomFactor> {
        std::mem::take(&mut self.pending)
    }

    /// Motion accumulated since the last emitted node (for the
    /// odometry output publisher).
    pub fn current_drift(&self) -> Pose3D {
        self.accumulated
    }

    /// Relative transform between two stamps from the trajectory log.
    ///
    /// `None` when either stamp predates the retained history.
    pub fn delta_between(&self, from_ns: u64, to_ns: u64) -> Option<Pose3D> {
        let at = |stamp: u64| -> Option<Pose3D> {
            // Latest cumulative pose at or before the stamp.
            let mut best: Option<Pose3D> = None;
            for (s, p) in &self.trajectory {
                if *s <= stamp {
                    best = Some(*p);
                } else {
                    break;
                }
            }
            best
        };
        let a = at(from_ns)?;
        let b = at(to_ns)?;
        Some(a.between(&b))
    }
}
