//! Commands produced by handlers and applied by the executor.
//!
//! Handlers are pure: they read the model and return a command list.
//! The executor is the only code that mutates the model, talks to
//! channels, or touches engines. Commands run in list order.

use crate::ephemeral::EphemeralDocStore;
use crate::model::{DocAwareness, SharedDoc};
use crate::ready::ReadyState;
use skiff_crdt::VersionVector;
use skiff_types::{AdapterId, AdapterType, ChannelId, ChannelKind, DocId, PeerId, PeerInfo};
use skiff_wire::{EphemeralEntry, Message};
use tokio::sync::mpsc;

/// One side effect to perform.
pub enum Command {
    /// Register a fresh channel in the model.
    InsertChannel {
        /// New channel id.
        channel_id: ChannelId,
        /// Transport class.
        adapter_type: AdapterType,
        /// Adapter instance.
        adapter_id: AdapterId,
        /// Trust classification.
        kind: ChannelKind,
        /// Outbound sink.
        outbound: mpsc::UnboundedSender<Vec<Message>>,
    },

    /// Queue a message for a channel; flushed in order at the end of the
    /// current event, coalescing into a batch frame per channel.
    Send {
        /// Destination channel.
        channel_id: ChannelId,
        /// The message.
        message: Message,
    },

    /// Upgrade a channel to Established and bind it to a peer.
    UpgradeChannel {
        /// The channel completing establishment.
        channel_id: ChannelId,
        /// Remote identity from the handshake.
        identity: PeerInfo,
    },

    /// Remove a channel and cascade-clean its bindings.
    RemoveChannel {
        /// The dead channel.
        channel_id: ChannelId,
    },

    /// Ensure a document is present in the model (registering the shared
    /// handles on first sight).
    EnsureDoc {
        /// The document.
        doc_id: DocId,
        /// Pre-created shared handle, if the facade made one; otherwise
        /// the executor creates via the engine factory.
        doc: Option<(SharedDoc, EphemeralDocStore)>,
    },

    /// Mark a channel (and its peer) as interested in a document.
    SubscribeChannel {
        /// The document.
        doc_id: DocId,
        /// The interested channel.
        channel_id: ChannelId,
    },

    /// Merge remote bytes into a document and gossip onward.
    ImportDoc {
        /// Target document.
        doc_id: DocId,
        /// Engine payload (snapshot or delta).
        data: Vec<u8>,
        /// Version declared by the sender.
        remote_version: VersionVector,
        /// Arrival channel, excluded from gossip.
        source: ChannelId,
    },

    /// Update the awareness cache for a peer and document.
    SetAwareness {
        /// The peer.
        peer_id: PeerId,
        /// The document.
        doc_id: DocId,
        /// New cached awareness.
        awareness: DocAwareness,
    },

    /// Publish a ready-state transition.
    SetReady {
        /// The document.
        doc_id: DocId,
        /// The peer.
        peer_id: PeerId,
        /// Kind of the channel driving the transition.
        kind: ChannelKind,
        /// The new state.
        state: ReadyState,
    },

    /// Apply presence entries to a document's store.
    ApplyEphemeral {
        /// Scope document.
        doc_id: DocId,
        /// The entries, verbatim from the wire or local setter.
        entries: Vec<EphemeralEntry>,
    },

    /// Delete a departed peer's presence everywhere and broadcast the
    /// deletions.
    RemoveEphemeralPeer {
        /// The departed peer.
        peer_id: PeerId,
    },

    /// Drop a document locally (deletion protocol or facade request).
    DeleteDocLocal {
        /// The document to drop.
        doc_id: DocId,
    },
}
