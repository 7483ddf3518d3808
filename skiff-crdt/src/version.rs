//! Opaque version vectors.
//!
//! On the wire and inside the synchronizer a version vector is just
//! bytes; only the engine that produced it can interpret or compare it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte-encoded logical clock of a document replica.
///
/// The synchronizer carries these around opaquely (awareness cache, sync
/// requests and responses) and delegates every comparison to the engine.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionVector(#[serde(with = "serde_bytes")] Vec<u8>);

impl VersionVector {
    /// Wraps an engine-produced encoding.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The encoded form, as sent on the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the vector, returning the encoding.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// True for the empty encoding, meaning "no known version".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionVector({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for VersionVector {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Causality relationship between two version vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// First vector happened before the second.
    Before,
    /// First vector happened after the second.
    After,
    /// Neither dominates the other.
    Concurrent,
    /// Identical clocks.
    Equal,
}

impl CausalOrder {
    /// True if the first vector is at least as advanced as the second.
    #[must_use]
    pub fn dominates(self) -> bool {
        matches!(self, Self::After | Self::Equal)
    }
}
