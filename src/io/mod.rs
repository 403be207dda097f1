//! I/O infrastructure: wire messages and the persistence bundle.

pub mod g2o;
pub mod messages;
pub mod pcd;
pub mod persistence;
