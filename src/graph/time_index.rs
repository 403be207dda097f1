//! Bidirectional stamp ↔ pose-key index.
//!
//! Asynchronous observations (artifacts, UWB ranges) carry timestamps,
//! not keys; this index binds them to the nearest pose node. Stamps are
//! nanoseconds since the epoch.

use std::collections::BTreeMap;

use crate::core::types::{Key, ERROR_KEY};

/// Ordered maps `stamp → key` and `key → stamp`, bijective per robot.
#[derive(Debug, Clone, Default)]
pub struct TimeIndex {
    stamp_to_key: BTreeMap<u64, Key>,
    key_to_stamp: BTreeMap<Key, u64>,
}

impl TimeIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the stamp of a newly created pose key.
    pub fn insert(&mut self, stamp_ns: u64, key: Key) {
        self.stamp_to_key.insert(stamp_ns, key);
        self.key_to_stamp.insert(key, stamp_ns);
    }

    /// Stamp recorded for a key.
    pub fn stamp_of(&self, key: &Key) -> Option<u64> {
        self.key_to_stamp.get(key).copied()
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.stamp_to_key.len()
    }

    /// Whether no keys are indexed.
    pub fn is_empty(&self) -> bool {
        self.stamp_to_key.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.stamp_to_key.clear();
        self.key_to_stamp.clear();
    }

    /// Key whose stamp is closest to `stamp_ns`.
    ///
    /// Ties between two neighbours resolve to the earlier key. A query
    /// before the first stamp returns the earliest key with a warning;
    /// a query after the last stamp returns `latest_key`. When the
    /// nearest stamp is farther than `threshold_ns`, the sentinel
    /// `ERROR_KEY` is returned and the caller must discard the
    /// observation.
    pub fn closest_key(&self, stamp_ns: u64, threshold_ns: u64, latest_key: Key) -> Key {
        if self.stamp_to_key.is_empty() {
            return ERROR_KEY;
        }

        let after = self.stamp_to_key.range(stamp_ns..).next();
        let before = self.stamp_to_key.range(..stamp_ns).next_back();

        let (chosen_stamp, chosen_key) = match (before, after) {
            (None, Some((&s, &k))) => {
                if s != stamp_ns {
                    log::warn!(
                        "stamp {} ns precedes graph time range (earliest {} ns)",
                        stamp_ns,
                        s
                    );
                }
                (s, k)
            }
            (Some(_), None) => {
                log::warn!(
                    "stamp {} ns is past the end of the graph time range, using latest pose",
                    stamp_ns
                );
                let s = self.key_to_stamp.get(&latest_key).copied().unwrap_or(stamp_ns);
                (s, latest_key)
            }
            (Some((&s1, &k1)), Some((&s2, &k2))) => {
                // Earlier key wins the exact tie.
                if stamp_ns - s1 <= s2 - stamp_ns {
                    (s1, k1)
                } else {
                    (s2, k2)
                }
            }
            (None, None) => return ERROR_KEY,
        };

        if chosen_stamp.abs_diff(stamp_ns) > threshold_ns {
            return ERROR_KEY;
        }
        chosen_key
    }

    /// Iterate `(stamp, key)` pairs in stamp order.
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Key)> {
        self.stamp_to_key.iter()
    }
}
