//! Scan filtering: random decimation followed by a voxel grid.
//!
//! Keyed scans are stored dense for map reconstruction; registration
//! works on filtered copies. Both stages can be disabled independently.

use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::HashMap;

use crate::config::FilterConfig;
use crate::core::types::{Point3D, PointCloud3D};

/// Point-cloud downsampling filter.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    config: FilterConfig,
}

impl ScanFilter {
    /// Create a filter with the given configuration.
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Apply both stages and return the reduced cloud.
    pub fn apply(&self, cloud: &PointCloud3D) -> PointCloud3D {
        let mut out = cloud.clone();
        if self.config.random_filter {
            out = self.random_decimate(&out);
        }
        if self.config.grid_filter {
            out = self.voxel_grid(&out);
        }
        out
    }

    /// Keep a random `1 - decimate_percentage` fraction of the points.
    fn random_decimate(&self, cloud: &PointCloud3D) -> PointCloud3D {
        let fraction = self.config.decimate_percentage.clamp(0.0, 1.0);
        let n_keep = ((1.0 - fraction) * cloud.len() as f64) as usize;
        if n_keep >= cloud.len() {
            return cloud.clone();
        }
        let mut rng = thread_rng();
        let mut points = cloud.points.clone();
        points.shuffle(&mut rng);
        points.truncate(n_keep);
        PointCloud3D { points }
    }

    /// Replace each occupied voxel with the centroid of its points.
    fn voxel_grid(&self, cloud: &PointCloud3D) -> PointCloud3D {
        let res = self.config.grid_res;
        if res <= 0.0 || cloud.is_empty() {
            return cloud.clone();
        }
        let mut cells: HashMap<(i64, i64, i64), (f64, f64, f64, usize)> = HashMap::new();
        for p in &cloud.points {
            let cell = (
                (p.x as f64 / res).floor() as i64,
                (p.y as f64 / res).floor() as i64,
                (p.z as f64 / res).floor() as i64,
            );
            let entry = cells.entry(cell).or_insert((0.0, 0.0, 0.0, 0));
            entry.0 += p.x as f64;
            entry.1 += p.y as f64;
            entry.2 += p.z as f64;
            entry.3 += 1;
        }
        let mut out = PointCloud3D::with_capacity(cells.len());
        for (_, (sx, sy, sz, n)) in cells {
            let inv = 1.0 / n as f64;
            out.push(Point3D::new(
                (sx * inv) as f32,
                (sy * inv) as f32,
                (sz * inv) as f32,
            ));
        }
        out
    }
}
