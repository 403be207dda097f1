//! Core value types shared by every layer.

mod covariance;
mod key;
mod pose;
mod scan;

pub use covariance::Covariance6;
pub use key::{Key, ERROR_KEY, LANDMARK_PREFIX, UWB_PREFIX};
pub use pose::Pose3D;
pub use scan::{Point3D, PointCloud3D};
