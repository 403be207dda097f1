//! Per-source factor ingest.
//!
//! Each handler buffers raw observations from one source and hands the
//! engine a typed batch once per tick. Translation into factors and
//! values happens in the engine, against the graph, through the sanity
//! gate.

mod artifact;
mod imu;
mod manual;
mod odometry;
mod uwb;

pub use artifact::{ArtifactHandler, ArtifactObservation};
pub use imu::{ImuAttitude, ImuHandler};
pub use manual::{ManualClosure, ManualLoopClosureHandler};
pub use odometry::{OdomFactor, OdometryHandler};
pub use uwb::{UwbHandler, UwbMode, UwbObservation};
