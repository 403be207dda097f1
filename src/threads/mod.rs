//! Worker threads: the ingest loop (single writer) and the publisher
//! (read-only fan-out).

mod ingest_thread;
mod publisher_thread;

pub use ingest_thread::{IngestThread, SensorEvent};
pub use publisher_thread::{PublisherOutputs, PublisherThread};
