//! The pose-graph layer: keys, time index, edge model, the store, and
//! the sanity gate around its mutations.

mod edge;
mod key_allocator;
mod pose_graph;
mod sanity;
mod time_index;

pub use edge::{EdgeKind, EdgePayload, GraphEdge};
pub use key_allocator::KeyAllocator;
pub use pose_graph::{MsgUpdateStats, Node, PendingBatch, PoseGraph};
pub use sanity::{dump_diagnostics, SanityGate};
pub use time_index::TimeIndex;
