//! Robust nonlinear optimization.
//!
//! Three layers: a dense Gauss-Newton solver over SE(3), a pairwise
//! consistency (PCM) outlier filter for loop closures, and the
//! `RobustOptimizer` wrapper that the engine updates incrementally.

mod gauss_newton;
mod pcm;
mod robust;

pub use gauss_newton::{
    optimize, total_error, GaussNewtonConfig, OptimizationResult, TerminationReason,
};
pub use pcm::{PcmConfig, PcmFilter};
pub use robust::{OptimizerCheckpoint, RobustOptimizer, UpdateOutcome};
