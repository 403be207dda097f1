//! Scan registration: filter, align, and emit a relative-pose factor.
//!
//! The registration pipeline takes two keyed scans with their current
//! world-frame estimates, aligns them with ICP, and yields the
//! *correction to the current relative pose estimate* together with a
//! fixed measurement covariance.

mod filter;
mod icp;

pub use filter::ScanFilter;
pub use icp::{Icp, IcpResult};

use crate::config::{FilterConfig, IcpConfig};
use crate::core::types::{Covariance6, PointCloud3D, Pose3D};
use crate::error::{Result, SlamError};

/// Output of a successful registration.
#[derive(Debug, Clone)]
pub struct RegistrationOutput {
    /// Relative-pose measurement from the source key to the target key.
    pub delta: Pose3D,
    /// Fixed diagonal covariance from the configured sigmas.
    pub covariance: Covariance6,
    /// ICP fitness score of the accepted alignment.
    pub fitness: f64,
}

/// The registration pipeline.
#[derive(Debug, Clone)]
pub struct ScanRegistration {
    filter: ScanFilter,
    icp: Icp,
    max_tolerable_fitness: f64,
    rot_sigma: f64,
    trans_sigma: f64,
}

impl ScanRegistration {
    /// Build the pipeline from its configuration pieces.
    pub fn new(
        filter_config: FilterConfig,
        icp_config: IcpConfig,
        rot_sigma: f64,
        trans_sigma: f64,
    ) -> Self {
        let max_tolerable_fitness = icp_config.max_tolerable_fitness;
        Self {
            filter: ScanFilter::new(filter_config),
            icp: Icp::new(icp_config),
            max_tolerable_fitness,
            rot_sigma,
            trans_sigma,
        }
    }

    /// The shared scan filter (used by the ingest path to pre-filter
    /// keyframe scans once).
    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// Register `scan_source` against `scan_target`.
    ///
    /// Both scans are body-frame; `pose_source` / `pose_target` are the
    /// current world-frame estimates of their keys. When the source was
    /// already filtered and transformed to the world frame (the loop
    /// detector does this once per query), pass it as
    /// `pre_filtered_source_world`.
    pub fn register(
        &self,
        scan_source: &PointCloud3D,
        scan_target: &PointCloud3D,
        pose_source: &Pose3D,
        pose_target: &Pose3D,
        pre_filtered_source_world: Option<&PointCloud3D>,
    ) -> Result<RegistrationOutput> {
        let source_world = match pre_filtered_source_world {
            Some(cloud) => cloud.clone(),
            None => self.filter.apply(scan_source).transformed(pose_source),
        };
        let target_world = self.filter.apply(scan_target).transformed(pose_target);

        let result = self.icp.align(&source_world, &target_world);
        if !result.converged {
            return Err(SlamError::RegistrationFailed(format!(
                "icp did not converge after {} iterations (fitness {:.4})",
                result.iterations, result.fitness
            )));
        }
        if result.fitness > self.max_tolerable_fitness {
            return Err(SlamError::RegistrationFailed(format!(
                "fitness {:.4} exceeds tolerable {:.4}",
                result.fitness, self.max_tolerable_fitness
            )));
        }

        // The ICP output corrects the source pose in the world frame.
        // Fold it into the relative estimate:
        //   delta = pose1⁻¹ · delta_icp⁻¹ · pose1 · (pose1⁻¹ · pose2)
        let delta_icp = result.transform;
        let update = pose_source
            .inverse()
            .compose(&delta_icp.inverse().compose(pose_source));
        let delta = update.compose(&pose_source.between(pose_target));

        Ok(RegistrationOutput {
            delta,
            covariance: covariance_from_sigmas(self.rot_sigma, self.trans_sigma),
            fitness: result.fitness,
        })
    }
}

/// Fixed diagonal measurement covariance. Not derived from ICP
/// residuals: the sigmas come from configuration.
fn covariance_from_sigmas(rot_sigma: f64, trans_sigma: f64) -> Covariance6 {
    Covariance6::from_sigmas(rot_sigma, trans_sigma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Point3D;
    use approx::assert_relative_eq;

    fn room_cloud() -> PointCloud3D {
        let mut cloud = PointCloud3D::new();
        for i in 0..60 {
            let s = i as f32 * 0.1;
            cloud.push(Point3D::new(s, 0.0, 0.0));
            cloud.push(Point3D::new(0.0, s, 0.0));
            cloud.push(Point3D::new(s, 3.0, 0.5));
        }
        cloud
    }

    fn pipeline() -> ScanRegistration {
        ScanRegistration::new(
            FilterConfig {
                grid_filter: false,
                grid_res: 0.0,
                random_filter: false,
                decimate_percentage: 0.0,
            },
            IcpConfig::default(),
            0.01,
            0.05,
        )
    }

    #[test]
    fn test_registration_of_identical_views() {
        // Both keys saw the same scene from the same place: the
        // relative estimate needs no correction.
        let scan = room_cloud();
        let pose1 = Pose3D::from_translation(1.0, 0.0, 0.0);
        let pose2 = Pose3D::from_translation(1.0, 0.0, 0.0);
        let out = pipeline()
            .register(&scan, &scan, &pose1, &pose2, None)
            .unwrap();
        assert!(out.delta.translation_norm() < 1e-2);
        assert!(out.fitness < 1e-4);
    }

    #[test]
    fn test_registration_corrects_drift() {
        // The second key actually sits at the same place as the first,
        // but odometry drifted and estimates it 0.2 m away. The scans
        // are identical, so registration recovers an (almost) identity
        // relative pose instead of the drifted estimate.
        let scan = room_cloud();
        let pose1 = Pose3D::identity();
        let pose2_estimate = Pose3D::from_translation(0.2, 0.0, 0.0);
        let out = pipeline()
            .register(&scan, &scan, &pose1, &pose2_estimate, None)
            .unwrap();
        assert!(out.delta.translation_norm() < 0.05);
    }

    #[test]
    fn test_disjoint_content_is_rejected() {
        let scan1 = room_cloud();
        let mut scan2 = PointCloud3D::new();
        for i in 0..60 {
            let a = i as f32 * 0.1;
            scan2.push(Point3D::new(50.0 + a.cos(), 50.0 + a.sin(), 2.0));
        }
        let err = pipeline()
            .register(
                &scan1,
                &scan2,
                &Pose3D::identity(),
                &Pose3D::identity(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SlamError::RegistrationFailed(_)));
    }

    #[test]
    fn test_fixed_covariance_from_config() {
        let c = covariance_from_sigmas(0.01, 0.05);
        assert_relative_eq!(c.matrix[(0, 0)], 1e-4, epsilon = 1e-12);
        assert_relative_eq!(c.matrix[(3, 3)], 2.5e-3, epsilon = 1e-12);
    }
}
