//! Symbolic graph keys.
//!
//! A key packs a one-byte prefix character and a 56-bit index into a
//! single `u64`. Prefixes partition entity namespaces: one lowercase
//! letter per robot for pose nodes, `l` for artifact landmarks, `u`
//! for UWB anchors. Keys order by their raw `u64` value, which groups
//! each prefix into its own contiguous range.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits reserved for the per-prefix index.
const INDEX_BITS: u32 = 56;

/// Mask selecting the index portion of a key.
const INDEX_MASK: u64 = (1u64 << INDEX_BITS) - 1;

/// Prefix character used by artifact landmark keys.
pub const LANDMARK_PREFIX: u8 = b'l';

/// Prefix character used by UWB anchor keys.
pub const UWB_PREFIX: u8 = b'u';

/// Sentinel returned when a time lookup falls outside the tolerated range.
pub const ERROR_KEY: Key = Key(u64::MAX);

/// A globally unique, totally ordered graph key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Key(u64);

impl Key {
    /// Compose a key from a prefix character and an index.
    ///
    /// The index is truncated to 56 bits.
    #[inline]
    pub fn new(prefix: u8, index: u64) -> Self {
        Key(((prefix as u64) << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Reconstruct a key from its raw `u64` representation.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Key(raw)
    }

    /// Raw `u64` representation (wire and persistence format).
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// The namespace prefix character.
    #[inline]
    pub fn prefix(&self) -> u8 {
        (self.0 >> INDEX_BITS) as u8
    }

    /// The per-prefix index.
    #[inline]
    pub fn index(&self) -> u64 {
        self.0 & INDEX_MASK
    }

    /// The next key in the same prefix namespace.
    #[inline]
    pub fn next(&self) -> Key {
        Key::new(self.prefix(), self.index() + 1)
    }

    /// The previous key in the same prefix namespace.
    ///
    /// Saturates at index zero.
    #[inline]
    pub fn prev(&self) -> Key {
        Key::new(self.prefix(), self.index().saturating_sub(1))
    }

    /// Whether this key belongs to an artifact landmark.
    #[inline]
    pub fn is_landmark(&self) -> bool {
        self.prefix() == LANDMARK_PREFIX
    }

    /// Whether this key belongs to a UWB anchor.
    #[inline]
    pub fn is_uwb(&self) -> bool {
        self.prefix() == UWB_PREFIX
    }

    /// Whether this key belongs to a robot pose chain.
    ///
    /// Landmark and anchor prefixes are the distinguished namespaces;
    /// everything else is a pose prefix.
    #[inline]
    pub fn is_pose(&self) -> bool {
        *self != ERROR_KEY && !self.is_landmark() && !self.is_uwb()
    }

    /// Index distance to another key of the same prefix.
    ///
    /// Returns `None` when the prefixes differ.
    pub fn index_distance(&self, other: &Key) -> Option<u64> {
        if self.prefix() == other.prefix() {
            Some(self.index().abs_diff(other.index()))
        } else {
            None
        }
    }

    /// Whether two keys are consecutive on the same odometry chain.
    pub fn is_consecutive(&self, other: &Key) -> bool {
        self.index_distance(other) == Some(1)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ERROR_KEY {
            return write!(f, "<error>");
        }
        let p = self.prefix();
        if p.is_ascii_graphic() {
            write!(f, "{}{}", p as char, self.index())
        } else {
            write!(f, "#{:x}:{}", p, self.index())
        }
    }
}
