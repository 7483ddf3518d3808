//! Peer identity and channel classification.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity exchanged during channel establishment.
///
/// The core never authenticates this; transports that care wrap the
/// channel in their own auth layer before handing it to the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Stable replica identifier.
    pub peer_id: PeerId,
    /// Human-readable name ("Ana's laptop").
    pub name: String,
    /// Free-form role tag ("user", "service", "storage-mirror").
    pub role: String,
}

impl PeerInfo {
    /// Creates a peer identity.
    pub fn new(peer_id: PeerId, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
            role: role.into(),
        }
    }
}

/// Classification of a channel's transport.
///
/// Storage channels are always trusted: rules default to allow and the
/// synchronizer never waits on them to satisfy network-sync predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Remote peer over a network transport.
    Network,
    /// Local or remote storage mirror.
    Storage,
    /// Anything else (in-process bridges, test harnesses).
    Other,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}
