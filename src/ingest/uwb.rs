//! UWB range and dropped-anchor observation handling.

use std::collections::HashMap;

use crate::core::types::{Key, Pose3D};
use crate::graph::KeyAllocator;

/// How a UWB observation constrains the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum UwbMode {
    /// Scalar range between the robot and the anchor.
    Range {
        /// Measured range, meters.
        range: f64,
    },
    /// The anchor was just dropped at a known pose relative to the
    /// robot body.
    BetweenDropped {
        /// Anchor pose relative to the robot at the stamp.
        relative_pose: Pose3D,
    },
    /// Range compensated by an estimated transmitter offset. The
    /// formulation is unspecified upstream; observations in this mode
    /// are rejected with a warning.
    EstimatedRange,
}

/// One UWB observation.
#[derive(Debug, Clone)]
pub struct UwbObservation {
    /// Observation stamp, nanoseconds.
    pub stamp_ns: u64,
    /// Stable anchor identifier.
    pub id: String,
    /// Constraint mode.
    pub mode: UwbMode,
}

/// The UWB factor source.
#[derive(Debug, Default)]
pub struct UwbHandler {
    buffer: Vec<UwbObservation>,
    id_to_key: HashMap<String, Key>,
    key_to_id: HashMap<Key, String>,
}

impl UwbHandler {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an observation.
    pub fn push_observation(&mut self, obs: UwbObservation) {
        self.buffer.push(obs);
    }

    /// Drain buffered observations for this tick.
    pub fn take_data(&mut self) -> Vec<UwbObservation> {
        std::mem::take(&mut self.buffer)
    }

    /// Key for an anchor id, allocating a `u` key on first contact.
    /// Returns `(key, is_new)`.
    pub fn key_for(&mut self, id: &str, allocator: &mut KeyAllocator) -> (Key, bool) {
        if let Some(key) = self.id_to_key.get(id) {
            return (*key, false);
        }
        let key = allocator.next_uwb();
        self.id_to_key.insert(id.to_string(), key);
        self.key_to_id.insert(key, id.to_string());
        (key, true)
    }

    /// Id associated with an anchor key.
    pub fn id_of(&self, key: &Key) -> Option<&str> {
        self.key_to_id.get(key).map(|s| s.as_str())
    }
}
