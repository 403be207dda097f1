//! Error types for the SLAM back-end.
//!
//! Every failure mode is local: an operation is rejected and the caller
//! continues, or the sanity gate rolls the graph back to its checkpoint.
//! Nothing here is allowed to propagate as a panic in non-test code.

use thiserror::Error;

use crate::core::types::Key;

/// Errors produced by graph mutations, registration, and persistence.
#[derive(Debug, Error)]
pub enum SlamError {
    /// A lookup or edge referenced a key that is not in the graph.
    #[error("key {0} does not exist in the pose graph")]
    KeyMissing(Key),

    /// An insert collided with a key that is already present.
    #[error("key {0} is already present in the pose graph")]
    KeyCollision(Key),

    /// A stamp fell outside the time index range by more than the
    /// configured threshold; the associated observation is discarded.
    #[error("timestamp {stamp_ns} ns is out of graph time range (nearest {nearest_ns} ns)")]
    TimeOutOfRange { stamp_ns: u64, nearest_ns: u64 },

    /// ICP did not converge or exceeded the fitness bound.
    #[error("scan registration failed: {0}")]
    RegistrationFailed(String),

    /// The sanity gate rejected an update and restored the checkpoint.
    #[error("sanity gate rejected update: {0}")]
    SanityRejected(String),

    /// The nonlinear solver failed internally; state was restored from
    /// the most recent checkpoint.
    #[error("solver error: {0}")]
    Solver(String),

    /// Disk I/O failure during save, load, or checkpointing.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for SlamError {
    fn from(e: std::io::Error) -> Self {
        SlamError::Persistence(e.to_string())
    }
}

impl From<zip::result::ZipError> for SlamError {
    fn from(e: zip::result::ZipError) -> Self {
        SlamError::Persistence(e.to_string())
    }
}

impl From<csv::Error> for SlamError {
    fn from(e: csv::Error) -> Self {
        SlamError::Persistence(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SlamError>;
