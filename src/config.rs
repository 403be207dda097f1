//! Engine configuration.
//!
//! All options are loaded from a single YAML file with serde; every
//! section has usable defaults so a partial file (or none at all)
//! still produces a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SlamError};

/// Node and keyframe creation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePolicyConfig {
    /// Accumulated translation (m) that forces a new pose node.
    pub translation_threshold_nodes: f64,
    /// Accumulated rotation (rad) that forces a new pose node.
    pub rotation_threshold_nodes: f64,
    /// Larger accumulated translation (m) that promotes the node's scan
    /// to a loop-closure-eligible keyframe.
    pub translation_threshold_kf: f64,
}

impl Default for NodePolicyConfig {
    fn default() -> Self {
        Self {
            translation_threshold_nodes: 1.0,
            rotation_threshold_nodes: 0.8,
            translation_threshold_kf: 2.0,
        }
    }
}

/// Loop-closure candidate gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopClosureConfig {
    /// Master switch for loop-closure checking.
    pub check_for_loop_closures: bool,
    /// Maximum translation distance (m) between two poses for the pair
    /// to be a registration candidate.
    pub proximity_threshold: f64,
    /// Distance (m) of recent trajectory excluded from candidates.
    pub distance_to_skip_recent_poses: f64,
    /// Distance (m) that must be travelled before another closure is
    /// attempted.
    pub distance_before_reclosing: f64,
    /// Accept at most one closure per query scan.
    pub only_one_per_scan: bool,
}

impl Default for LoopClosureConfig {
    fn default() -> Self {
        Self {
            check_for_loop_closures: true,
            proximity_threshold: 10.0,
            distance_to_skip_recent_poses: 20.0,
            distance_before_reclosing: 5.0,
            only_one_per_scan: false,
        }
    }
}

/// ICP registration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Convergence threshold on the incremental transform.
    pub tf_epsilon: f64,
    /// Maximum correspondence distance (m).
    pub corr_dist: f64,
    /// Iteration cap.
    pub iterations: u32,
    /// Fitness score above which a converged alignment is rejected.
    pub max_tolerable_fitness: f64,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            tf_epsilon: 1e-4,
            corr_dist: 1.0,
            iterations: 30,
            max_tolerable_fitness: 0.5,
        }
    }
}

/// Scan filter parameters (voxel + random decimation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Enable the voxel grid stage.
    pub grid_filter: bool,
    /// Voxel edge length (m).
    pub grid_res: f64,
    /// Enable the random decimation stage.
    pub random_filter: bool,
    /// Fraction of points removed by decimation, clamped to [0, 1].
    pub decimate_percentage: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            grid_filter: true,
            grid_res: 0.2,
            random_filter: true,
            decimate_percentage: 0.5,
        }
    }
}

/// Robust optimizer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Run the full iteration loop only every Nth update.
    pub relinearize_skip: u32,
    /// Minimum update norm that forces relinearization regardless of
    /// the skip counter.
    pub relinearize_threshold: f64,
    /// Gauss-Newton iteration cap per optimization pass.
    pub max_iterations: u32,
    /// Mahalanobis threshold for the odometry consistency check.
    pub odometry_check_threshold: f64,
    /// Mahalanobis threshold for the pairwise consistency check.
    pub pairwise_check_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            relinearize_skip: 1,
            relinearize_threshold: 0.01,
            max_iterations: 50,
            odometry_check_threshold: 10.0,
            pairwise_check_threshold: 5.0,
        }
    }
}

/// Fixed noise models for each measurement source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Laser loop closure rotation sigma (rad).
    pub laser_lc_rot_sigma: f64,
    /// Laser loop closure translation sigma (m).
    pub laser_lc_trans_sigma: f64,
    /// Manual loop closure rotation precision (1/rad²).
    pub manual_lc_rot_precision: f64,
    /// Manual loop closure translation precision (1/m²).
    pub manual_lc_trans_precision: f64,
    /// Artifact rotation precision.
    pub artifact_rot_precision: f64,
    /// Artifact translation precision.
    pub artifact_trans_precision: f64,
    /// UWB range measurement sigma (m).
    pub uwb_range_measurement_error: f64,
    /// UWB dropped-anchor rotation sigma (rad).
    pub uwb_between_rot_sigma: f64,
    /// UWB dropped-anchor translation sigma (m).
    pub uwb_between_trans_sigma: f64,
    /// Odometry edge rotation sigma (rad).
    pub odom_rot_sigma: f64,
    /// Odometry edge translation sigma (m).
    pub odom_trans_sigma: f64,
    /// IMU attitude sigma (isotropic).
    pub imu_attitude_sigma: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            laser_lc_rot_sigma: 0.01,
            laser_lc_trans_sigma: 0.05,
            manual_lc_rot_precision: 0.0,
            manual_lc_trans_precision: 1e6,
            artifact_rot_precision: 0.0,
            artifact_trans_precision: 100.0,
            uwb_range_measurement_error: 0.5,
            uwb_between_rot_sigma: 0.5,
            uwb_between_trans_sigma: 0.5,
            odom_rot_sigma: 0.01,
            odom_trans_sigma: 0.04,
            imu_attitude_sigma: 0.1,
        }
    }
}

/// Sanity gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanityConfig {
    /// Master switch for the translation-delta checks.
    pub b_check_deltas: bool,
    /// Allowed translation change (m) at the previous node after an
    /// odometry extension.
    pub translational_sanity_check_odom: f64,
    /// Allowed translation change (m) at the previous node after a
    /// loop closure.
    pub translational_sanity_check_lc: f64,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            b_check_deltas: true,
            translational_sanity_check_odom: 0.5,
            translational_sanity_check_lc: 1.0,
        }
    }
}

/// Checkpoint bundle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Whether to write backup bundles at all.
    pub save_posegraph_backup: bool,
    /// New keys between periodic backups.
    pub keys_between_each_posegraph_backup: u64,
    /// Bundle path.
    pub backup_path: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            save_posegraph_backup: true,
            keys_between_each_posegraph_backup: 50,
            backup_path: "posegraph_backup.zip".to_string(),
        }
    }
}

/// Initial prior: fiducial calibration pose and its sigmas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialPoseConfig {
    /// Fiducial position [x, y, z] (m).
    pub position: [f64; 3],
    /// Fiducial orientation [roll, pitch, yaw] (rad).
    pub orientation: [f64; 3],
    /// Position sigmas [x, y, z].
    pub position_sigma: [f64; 3],
    /// Orientation sigmas [roll, pitch, yaw].
    pub orientation_sigma: [f64; 3],
}

impl Default for InitialPoseConfig {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [0.0; 3],
            position_sigma: [0.1, 0.1, 0.1],
            orientation_sigma: [0.02, 0.02, 0.02],
        }
    }
}

/// Deployment role and identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Run as the base station (merger) instead of a robot.
    pub b_is_basestation: bool,
    /// Names of all robots the base station listens to.
    pub robot_names: Vec<String>,
    /// Single-character pose-key prefix for this robot.
    pub robot_prefix: String,
    /// Optimize on incoming artifact edges at the base station.
    pub b_optimize_on_artifacts: bool,
    /// Add IMU attitude factors alongside odometry.
    pub b_add_imu_factors: bool,
    /// Number of IMU factors between optimization triggers.
    pub imu_factors_per_opt: u32,
    /// Stamp association tolerance (s) for the time index.
    pub time_threshold: f64,
    /// Ingest tick rate (Hz).
    pub update_rate: f64,
    /// Surveyed artifact ground truth, one entry per artifact:
    /// `"<id> <x> <y> <z>"`.
    pub artifact_gt: Vec<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            b_is_basestation: false,
            robot_names: Vec::new(),
            robot_prefix: "a".to_string(),
            b_optimize_on_artifacts: false,
            b_add_imu_factors: false,
            imu_factors_per_opt: 10,
            time_threshold: 1.0,
            update_rate: 10.0,
            artifact_gt: Vec::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    pub nodes: NodePolicyConfig,
    pub loop_closure: LoopClosureConfig,
    pub icp: IcpConfig,
    pub filtering: FilterConfig,
    pub optimizer: OptimizerConfig,
    pub noise: NoiseConfig,
    pub sanity: SanityConfig,
    pub backup: BackupConfig,
    pub init: InitialPoseConfig,
    pub deployment: DeploymentConfig,
}

impl SlamConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SlamError::Persistence(format!("failed to read config: {}", e)))?;
        serde_yaml::from_str(&content)
            .map_err(|e| SlamError::Persistence(format!("failed to parse config: {}", e)))
    }

    /// Pose-key prefix byte for this robot.
    pub fn prefix_byte(&self) -> u8 {
        self.deployment.robot_prefix.bytes().next().unwrap_or(b'a')
    }

    /// Number of recent poses excluded from loop candidates,
    /// derived from the skip distance and the node spacing.
    pub fn skip_recent_poses(&self) -> u64 {
        (self.loop_closure.distance_to_skip_recent_poses
            / self.nodes.translation_threshold_nodes) as u64
    }

    /// Number of poses that must pass before reclosing,
    /// derived from the reclosing distance and the node spacing.
    pub fn poses_before_reclosing(&self) -> u64 {
        (self.loop_closure.distance_before_reclosing / self.nodes.translation_threshold_nodes)
            as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = SlamConfig::default();
        assert!(cfg.nodes.translation_threshold_kf >= cfg.nodes.translation_threshold_nodes);
        assert!(cfg.loop_closure.proximity_threshold > 0.0);
        assert_eq!(cfg.prefix_byte(), b'a');
    }

    #[test]
    fn test_derived_pose_counts() {
        let mut cfg = SlamConfig::default();
        cfg.nodes.translation_threshold_nodes = 0.5;
        cfg.loop_closure.distance_to_skip_recent_poses = 10.0;
        cfg.loop_closure.distance_before_reclosing = 2.0;
        assert_eq!(cfg.skip_recent_poses(), 20);
        assert_eq!(cfg.poses_before_reclosing(), 4);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "nodes:\n  translation_threshold_nodes: 0.25\n";
        let cfg: SlamConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.nodes.translation_threshold_nodes, 0.25);
        // Untouched sections keep defaults.
        assert!(cfg.loop_closure.check_for_loop_closures);
    }
}
