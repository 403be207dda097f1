//! Artifact and april-tag observation handling.
//!
//! Observations arrive already associated to a stable artifact id. The
//! handler buffers them, owns the id ↔ key association, and can undo
//! the associations of a failed batch so the next tick starts clean.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::core::types::{Covariance6, Key, Pose3D};
use crate::graph::KeyAllocator;

/// One artifact (or april tag) sighting.
#[derive(Debug, Clone)]
pub struct ArtifactObservation {
    /// Observation stamp, nanoseconds.
    pub stamp_ns: u64,
    /// Stable artifact identifier.
    pub id: String,
    /// Position of the artifact relative to the robot body at the
    /// stamp.
    pub relative_position: Vector3<f64>,
    /// Measurement covariance; fixed precisions apply when absent.
    pub covariance: Option<Covariance6>,
    /// April tags additionally carry surveyed ground truth.
    pub ground_truth: Option<Pose3D>,
}

/// The artifact factor source.
#[derive(Debug, Default)]
pub struct ArtifactHandler {
    buffer: Vec<ArtifactObservation>,
    id_to_key: HashMap<String, Key>,
    key_to_id: HashMap<Key, String>,
    /// Ids first associated during the in-flight batch.
    newly_associated: Vec<String>,
}

impl ArtifactHandler {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a sighting.
    pub fn push_observation(&mut self, obs: ArtifactObservation) {
        self.buffer.push(obs);
    }

    /// Drain buffered sightings for this tick.
    pub fn take_data(&mut self) -> Vec<ArtifactObservation> {
        std::mem::take(&mut self.buffer)
    }

    /// Key for an artifact id, allocating a landmark key on first
    /// sighting. Returns `(key, is_new)`.
    pub fn key_for(&mut self, id: &str, allocator: &mut KeyAllocator) -> (Key, bool) {
        if let Some(key) = self.id_to_key.get(id) {
            return (*key, false);
        }
        let key = allocator.next_landmark();
        self.id_to_key.insert(id.to_string(), key);
        self.key_to_id.insert(key, id.to_string());
        self.newly_associated.push(id.to_string());
        (key, true)
    }

    /// Id associated with a landmark key.
    pub fn id_of(&self, key: &Key) -> Option<&str> {
        self.key_to_id.get(key).map(|s| s.as_str())
    }

    /// Known landmark keys.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.key_to_id.keys()
    }

    /// Finish a batch. On failure the associations created for it are
    /// removed so the half-added observations leave no trace.
    pub fn clean_failed_factors(&mut self, batch_succeeded: bool) {
        if !batch_succeeded {
            for id in self.newly_associated.drain(..) {
                if let Some(key) = self.id_to_key.remove(&id) {
                    self.key_to_id.remove(&key);
                }
            }
        } else {
            self.newly_associated.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: &str, stamp: u64) -> ArtifactObservation {
        ArtifactObservation {
            stamp_ns: stamp,
            id: id.to_string(),
            relative_position: Vector3::new(1.0, 0.0, 0.0),
            covariance: None,
            ground_truth: None,
        }
    }

    #[test]
    fn test_buffer_drain() {
        let mut h = ArtifactHandler::new();
        h.push_observation(obs("backpack-1", 10));
        h.push_observation(obs("backpack-2", 20));
        assert_eq!(h.take_data().len(), 2);
        assert!(h.take_data().is_empty());
    }

    #[test]
    fn test_key_assignment_is_stable() {
        let mut h = ArtifactHandler::new();
        let mut alloc = KeyAllocator::new();
        let (k1, new1) = h.key_for("backpack-1", &mut alloc);
        let (k2, new2) = h.key_for("backpack-2", &mut alloc);
        let (k1_again, new_again) = h.key_for("backpack-1", &mut alloc);
        assert!(new1 && new2 && !new_again);
        assert_eq!(k1, k1_again);
        assert_ne!(k1, k2);
        assert_eq!(h.id_of(&k1), Some("backpack-1"));
    }

    #[test]
    fn test_clean_failed_undoes_associations() {
        let mut h = ArtifactHandler::new();
        let mut alloc = KeyAllocator::new();
        let (k_old, _) = h.key_for("survivor-1", &mut alloc);
        h.clean_failed_factors(true);

        let (_k_new, _) = h.key_for("survivor-2", &mut alloc);
        h.clean_failed_factors(false);

        // The failed batch's association is gone, the old one stays.
        assert_eq!(h.id_of(&k_old), Some("survivor-1"));
        let (k_retry, is_new) = h.key_for("survivor-2", &mut alloc);
        assert!(is_new);
        // The allocator never reuses indices, so the retried key differs.
        assert_ne!(k_retry, _k_new);
    }
}
