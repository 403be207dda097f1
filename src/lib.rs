//! SanghaSLAM - Multi-robot pose-graph SLAM back-end
//!
//! # Architecture
//!
//! The crate is organized into layered modules:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   threads/                          │  ← Ingest + publisher loops
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Robot / Base orchestration
//! │            (tick, commands, merger use)             │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │     graph/  optimizer/  loop_closure/  merger/      │  ← The pose-graph engine
//! │   (store, sanity gate, robust solve, detection)     │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │            ingest/       registration/              │  ← Factor sources, ICP
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │               io/        state/                     │  ← Messages, bundles, sharing
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Keys, poses, clouds, SE(3)
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Two deployment variants share the codebase: a **robot** ingests its
//! own odometry, scans, artifact, UWB, and IMU observations into a
//! pose graph with laser loop closure; the **base station** fuses the
//! incremental graphs of every robot into one canonical graph. All
//! mutations run through a sanity gate with checkpoint rollback and a
//! robust (pairwise-consistency filtered) Gauss-Newton optimizer.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Errors and configuration
// ============================================================================
pub mod config;
pub mod error;

// ============================================================================
// Layer 3: Graph model, optimization, registration
// ============================================================================
pub mod graph;
pub mod optimizer;
pub mod registration;

// ============================================================================
// Layer 4: Detection, ingest, merging
// ============================================================================
pub mod ingest;
pub mod loop_closure;
pub mod merger;

// ============================================================================
// Layer 5: I/O, shared state, engines, threads
// ============================================================================
pub mod engine;
pub mod io;
pub mod state;
pub mod threads;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::types::{Covariance6, Key, Point3D, PointCloud3D, Pose3D, ERROR_KEY};

// Configuration and errors
pub use config::SlamConfig;
pub use error::{Result, SlamError};

// Graph layer
pub use graph::{EdgeKind, EdgePayload, GraphEdge, KeyAllocator, Node, PoseGraph, SanityGate, TimeIndex};

// Optimization
pub use optimizer::{OptimizationResult, RobustOptimizer, TerminationReason, UpdateOutcome};

// Registration and loop closure
pub use loop_closure::{LoopClosureDetector, LoopClosureSummary};
pub use registration::{Icp, IcpResult, RegistrationOutput, ScanFilter, ScanRegistration};

// Ingest
pub use ingest::{
    ArtifactHandler, ArtifactObservation, ImuAttitude, ImuHandler, ManualClosure,
    ManualLoopClosureHandler, OdomFactor, OdometryHandler, UwbHandler, UwbMode, UwbObservation,
};

// Merger and engines
pub use engine::{BaseEngine, Engine, RobotEngine};
pub use merger::GraphMerger;

// Wire messages
pub use io::messages::{KeyedScanMsg, PoseGraphEdgeMsg, PoseGraphMsg, PoseGraphNodeMsg};

// Threads and state
pub use state::{
    create_command_channel, create_map_cloud, create_shared_state, EngineCommand, SharedState,
    SharedStateHandle,
};
pub use threads::{IngestThread, PublisherOutputs, PublisherThread, SensorEvent};
