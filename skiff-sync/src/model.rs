//! In-memory synchronizer state.
//!
//! The model is read by handlers and mutated only by the executor, on
//! the synchronizer task. Three naming spaces meet here: adapters own
//! channels, channels bind to peers after establishment, and documents
//! subscribe channels.

use crate::ephemeral::EphemeralDocStore;
use skiff_crdt::{CrdtDoc, VersionVector};
use skiff_types::{AdapterId, AdapterType, ChannelId, ChannelKind, DocId, PeerId, PeerInfo};
use skiff_wire::Message;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Shared, exclusively-synchronizer-mutated engine handle.
pub type SharedDoc = Arc<Mutex<Box<dyn CrdtDoc>>>;

/// Everything the synchronizer knows about one document.
pub struct DocState {
    /// The engine handle. Exactly one per DocId in the whole process.
    pub doc: SharedDoc,
    /// Presence store shared with the facade.
    pub ephemeral: EphemeralDocStore,
    /// Channels that declared interest in this document.
    pub subscribers: HashSet<ChannelId>,
}

impl DocState {
    /// Wraps a freshly registered document.
    #[must_use]
    pub fn new(doc: SharedDoc, ephemeral: EphemeralDocStore) -> Self {
        Self {
            doc,
            ephemeral,
            subscribers: HashSet::new(),
        }
    }

    /// Current engine version.
    #[must_use]
    pub fn version(&self) -> VersionVector {
        self.doc.lock().expect("doc handle poisoned").version()
    }
}

/// Establishment progress of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Transport is up; the remote identity is unknown.
    Connected,
    /// Handshake completed; the channel speaks for a peer.
    Established(PeerId),
}

/// One bidirectional message conduit.
pub struct Channel {
    /// Process-local id.
    pub id: ChannelId,
    /// Transport class tag.
    pub adapter_type: AdapterType,
    /// Transport instance.
    pub adapter_id: AdapterId,
    /// Trust classification.
    pub kind: ChannelKind,
    /// Establishment progress.
    pub state: ChannelState,
    /// Outbound sink; each item is one flush, sent in order.
    pub outbound: mpsc::UnboundedSender<Vec<Message>>,
}

impl Channel {
    /// The bound peer, if established.
    #[must_use]
    pub fn peer_id(&self) -> Option<&PeerId> {
        match &self.state {
            ChannelState::Established(peer) => Some(peer),
            ChannelState::Connected => None,
        }
    }
}

/// What we remember a peer knows about one of our documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DocAwareness {
    /// The peer holds the document; optionally at a known version.
    HasDoc(Option<VersionVector>),
    /// The peer answered `unavailable` for it.
    NoDoc,
    /// Never heard either way.
    #[default]
    Unknown,
}

/// Durable (process-lifetime) state for one remote peer.
///
/// Survives channel churn: the awareness cache is what makes
/// reconnections cheap.
pub struct PeerState {
    /// Identity from the establishment exchange.
    pub info: PeerInfo,
    /// Channels currently bound to this peer. Duplicates coexist.
    pub channels: HashSet<ChannelId>,
    /// Documents the peer has shown interest in.
    pub subscriptions: HashSet<DocId>,
    /// Reconnection cache: what the peer knows per document.
    pub awareness: HashMap<DocId, DocAwareness>,
}

impl PeerState {
    /// Creates peer state from a first establishment.
    #[must_use]
    pub fn new(info: PeerInfo) -> Self {
        Self {
            info,
            channels: HashSet::new(),
            subscriptions: HashSet::new(),
            awareness: HashMap::new(),
        }
    }

    /// Cached awareness for a document.
    #[must_use]
    pub fn awareness_of(&self, doc_id: &DocId) -> &DocAwareness {
        static UNKNOWN: DocAwareness = DocAwareness::Unknown;
        self.awareness.get(doc_id).unwrap_or(&UNKNOWN)
    }
}

/// The synchronizer's complete in-memory state.
#[derive(Default)]
pub struct SyncModel {
    /// Known documents.
    pub documents: HashMap<DocId, DocState>,
    /// Live channels.
    pub channels: HashMap<ChannelId, Channel>,
    /// Known peers; never garbage-collected while the process lives.
    pub peers: HashMap<PeerId, PeerState>,
}

impl SyncModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel, if still live.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    /// The peer an established channel speaks for.
    #[must_use]
    pub fn peer_of_channel(&self, id: ChannelId) -> Option<&PeerState> {
        let channel = self.channels.get(&id)?;
        let peer_id = channel.peer_id()?;
        self.peers.get(peer_id)
    }

    /// Established channels subscribed to a document, minus an optional
    /// exclusion (the arrival channel of a relayed message).
    #[must_use]
    pub fn subscribed_channels(
        &self,
        doc_id: &DocId,
        exclude: Option<ChannelId>,
    ) -> Vec<ChannelId> {
        let Some(doc) = self.documents.get(doc_id) else {
            return Vec::new();
        };
        let mut ids: Vec<ChannelId> = doc
            .subscribers
            .iter()
            .copied()
            .filter(|id| Some(*id) != exclude)
            .filter(|id| {
                self.channels
                    .get(id)
                    .map_or(false, |ch| matches!(ch.state, ChannelState::Established(_)))
            })
            .collect();
        ids.sort();
        ids
    }

    /// Every established channel, in id order.
    #[must_use]
    pub fn established_channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self
            .channels
            .values()
            .filter(|ch| matches!(ch.state, ChannelState::Established(_)))
            .map(|ch| ch.id)
            .collect();
        ids.sort();
        ids
    }

    /// All document ids, sorted for deterministic iteration.
    #[must_use]
    pub fn doc_ids(&self) -> Vec<DocId> {
        let mut ids: Vec<DocId> = self.documents.keys().cloned().collect();
        ids.sort();
        ids
    }
}
