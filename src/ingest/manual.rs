//! Operator-supplied loop closures.

use crate::core::types::{Key, Pose3D};

/// One manual closure request.
#[derive(Debug, Clone)]
pub struct ManualClosure {
    /// First key (later pose).
    pub key_from: Key,
    /// Second key (earlier pose).
    pub key_to: Key,
    /// Operator-estimated relative pose between them.
    pub relative_pose: Pose3D,
}

/// The manual loop-closure source.
#[derive(Debug, Default)]
pub struct ManualLoopClosureHandler {
    buffer: Vec<ManualClosure>,
}

impl ManualLoopClosureHandler {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a closure request.
    pub fn push_closure(&mut self, closure: ManualClosure) {
        self.buffer.push(closure);
    }

    /// Drain queued requests for this tick.
    pub fn take_data(&mut self) -> Vec<ManualClosure> {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_drain() {
        let mut h = ManualLoopClosureHandler::new();
        h.push_closure(ManualClosure {
            key_from: Key::new(b'a', 10),
            key_to: Key::new(b'a', 0),
            relative_pose: Pose3D::identity(),
        });
        assert_eq!(h.take_data().len(), 1);
        assert!(h.take_data().is_empty());
    }
}
