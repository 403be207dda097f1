//! Point-to-point ICP in 3-D.
//!
//! Iteratively pairs each source point with its nearest target
//! neighbour (k-d tree), solves the optimal rigid alignment in closed
//! form (SVD), and accumulates the transform until the incremental
//! update falls below the configured epsilon.

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use crate::config::IcpConfig;
use crate::core::types::{PointCloud3D, Pose3D};

/// Result of one ICP alignment.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Transform that aligns the source cloud onto the target.
    pub transform: Pose3D,
    /// Whether the iteration converged within the epsilon.
    pub converged: bool,
    /// Mean squared correspondence distance at the final alignment.
    pub fitness: f64,
    /// Iterations performed.
    pub iterations: u32,
}

impl IcpResult {
    fn failed() -> Self {
        Self {
            transform: Pose3D::identity(),
            converged: false,
            fitness: f64::MAX,
            iterations: 0,
        }
    }
}

/// Minimum correspondences needed for a stable closed-form solve.
const MIN_CORRESPONDENCES: usize = 6;

/// Point-to-point ICP matcher.
#[derive(Debug, Clone)]
pub struct Icp {
    config: IcpConfig,
}

impl Icp {
    /// Create a matcher with the given configuration.
    pub fn new(config: IcpConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    /// Align `source` onto `target`. Both clouds are expected in the
    /// same (world) frame; the initial guess is identity.
    pub fn align(&self, source: &PointCloud3D, target: &PointCloud3D) -> IcpResult {
        if source.len() < MIN_CORRESPONDENCES || target.len() < MIN_CORRESPONDENCES {
            return IcpResult::failed();
        }

        let mut tree: KdTree<f64, 3> = KdTree::new();
        for (i, p) in target.points.iter().enumerate() {
            tree.add(&[p.x as f64, p.y as f64, p.z as f64], i as u64);
        }

        let max_dist_sq = self.config.corr_dist * self.config.corr_dist;
        let mut current = Pose3D::identity();
        let mut iterations = 0;

        for iter in 0..self.config.iterations {
            iterations = iter + 1;

            let correspondences = self.find_correspondences(source, &tree, &current, max_dist_sq);
            if correspondences.len() < MIN_CORRESPONDENCES {
                return IcpResult::failed();
            }

            let Some(delta) = self.solve_alignment(source, target, &correspondences, &current)
            else {
                return IcpResult::failed();
            };
            current = delta.compose(&current);

            let update = delta.translation_norm() + delta.rotation_angle();
            if update < self.config.tf_epsilon {
                let fitness = self.fitness(source, &tree, &current, max_dist_sq);
                return IcpResult {
                    transform: current,
                    converged: true,
                    fitness,
                    iterations,
                };
            }
        }

        let fitness = self.fitness(source, &tree, &current, max_dist_sq);
        IcpResult {
            transform: current,
            converged: false,
            fitness,
            iterations,
        }
    }

    /// `(source_idx, target_idx)` pairs within the correspondence gate.
    fn find_correspondences(
        &self,
        source: &PointCloud3D,
        tree: &KdTree<f64, 3>,
        current: &Pose3D,
        max_dist_sq: f64,
    ) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(source.len());
        for (i, p) in source.points.iter().enumerate() {
            let q = current.transform_point(&p.to_vector());
            let nearest = tree.nearest_one::<SquaredEuclidean>(&[q.x, q.y, q.z]);
            if nearest.distance <= max_dist_sq {
                out.push((i, nearest.item as usize));
            }
        }
        out
    }

    /// Closed-form rigid alignment of the current correspondences.
    fn solve_alignment(
        &self,
        source: &PointCloud3D,
        target: &PointCloud3D,
        correspondences: &[(usize, usize)],
        current: &Pose3D,
    ) -> Option<Pose3D> {
        let n = correspondences.len() as f64;
        let mut source_centroid = Vector3::zeros();
        let mut target_centroid = Vector3::zeros();
        for &(si, ti) in correspondences {
            source_centroid += current.transform_point(&source.points[si].to_vector());
            target_centroid += target.points[ti].to_vector();
        }
        source_centroid /= n;
        target_centroid /= n;

        let mut h = Matrix3::zeros();
        for &(si, ti) in correspondences {
            let s = current.transform_point(&source.points[si].to_vector()) - source_centroid;
            let t = target.points[ti].to_vector() - target_centroid;
            h += s * t.transpose();
        }

        let svd = h.svd(true, true);
        let u = svd.u?;
        let v_t = svd.v_t?;
        let mut r = v_t.transpose() * u.transpose();
        if r.determinant() < 0.0 {
            // Reflection: flip the axis of the smallest singular value.
            let mut v = v_t.transpose();
            v.column_mut(2).neg_mut();
            r = v * u.transpose();
        }
        let rotation = UnitQuaternion::from_matrix(&r);
        let translation = target_centroid - r * source_centroid;
        Some(Pose3D::from_parts(translation, rotation))
    }

    /// Mean squared nearest-neighbour distance within the gate.
    fn fitness(
        &self,
        source: &PointCloud3D,
        tree: &KdTree<f64, 3>,
        current: &Pose3D,
        max_dist_sq: f64,
    ) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for p in &source.points {
            let q = current.transform_point(&p.to_vector());
            let nearest = tree.nearest_one::<SquaredEuclidean>(&[q.x, q.y, q.z]);
            if nearest.distance <= max_dist_sq {
                sum += nearest.distance;
                count += 1;
            }
        }
        if count == 0 {
            f64::MAX
        } else {
            sum / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Point3D;
    use approx::assert_relative_eq;

    fn corner_cloud(n: usize, length: f32) -> PointCloud3D {
        let mut cloud = PointCloud3D::with_capacity(3 * n);
        for i in 0..n {
            let s = (i as f32 / (n - 1) as f32) * length;
            cloud.push(Point3D::new(s, 0.0, 0.0));
            cloud.push(Point3D::new(0.0, s, 0.0));
            cloud.push(Point3D::new(0.0, 0.0, s));
        }
        cloud
    }

    #[test]
    fn test_identity_alignment() {
        let cloud = corner_cloud(30, 2.0);
        let result = Icp::new(IcpConfig::default()).align(&cloud, &cloud);
        assert!(result.converged);
        assert!(result.transform.translation_norm() < 1e-3);
        assert!(result.fitness < 1e-6);
    }

    #[test]
    fn test_small_translation_recovered() {
        let source = corner_cloud(40, 2.0);
        let offset = Pose3D::from_translation(0.1, -0.05, 0.08);
        let target = source.transformed(&offset);
        let result = Icp::new(IcpConfig::default()).align(&source, &target);
        assert!(result.converged);
        assert_relative_eq!(result.transform.translation().x, 0.1, epsilon = 0.02);
        assert_relative_eq!(result.transform.translation().y, -0.05, epsilon = 0.02);
        assert_relative_eq!(result.transform.translation().z, 0.08, epsilon = 0.02);
    }

    #[test]
    fn test_small_rotation_recovered() {
        let source = corner_cloud(40, 2.0);
        let offset = Pose3D::from_xyz_rpy(0.0, 0.0, 0.0, 0.0, 0.0, 0.08);
        let target = source.transformed(&offset);
        let result = Icp::new(IcpConfig::default()).align(&source, &target);
        assert!(result.converged);
        assert_relative_eq!(result.transform.rotation_angle(), 0.08, epsilon = 0.02);
    }

    #[test]
    fn test_tiny_clouds_fail() {
        let mut cloud = PointCloud3D::new();
        cloud.push(Point3D::new(0.0, 0.0, 0.0));
        let result = Icp::new(IcpConfig::default()).align(&cloud, &cloud);
        assert!(!result.converged);
    }

    #[test]
    fn test_disjoint_clouds_have_poor_fitness() {
        let source = corner_cloud(30, 2.0);
        let far = source.transformed(&Pose3D::from_translation(100.0, 0.0, 0.0));
        let result = Icp::new(IcpConfig::default()).align(&source, &far);
        // No correspondences within the gate.
        assert!(!result.converged);
    }
}
