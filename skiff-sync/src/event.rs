//! Events entering the work queue.
//!
//! Every source of change — adapters, inbound messages, the facade,
//! timers — is funneled through [`SyncEvent`] onto a single queue, which
//! is what makes dispatch non-reentrant and ordering per-channel.

use crate::model::SharedDoc;
use crate::ephemeral::EphemeralDocStore;
use skiff_types::{AdapterId, AdapterType, ChannelId, ChannelKind, DocId};
use skiff_wire::Message;
use tokio::sync::mpsc;

/// One unit of work for the synchronizer.
pub enum SyncEvent {
    /// An adapter produced a new channel.
    ChannelAdded {
        /// The fresh channel id.
        channel_id: ChannelId,
        /// Transport class of the owning adapter.
        adapter_type: AdapterType,
        /// Owning adapter instance.
        adapter_id: AdapterId,
        /// Trust classification.
        kind: ChannelKind,
        /// Outbound sink; each item is one in-order flush.
        outbound: mpsc::UnboundedSender<Vec<Message>>,
    },

    /// A channel went away (adapter disconnect or send failure).
    ChannelRemoved {
        /// The dead channel.
        channel_id: ChannelId,
    },

    /// Start the establishment handshake on a channel (initiator side).
    EstablishChannel {
        /// The channel to establish.
        channel_id: ChannelId,
    },

    /// A decoded message arrived on a channel.
    Inbound {
        /// Arrival channel.
        channel_id: ChannelId,
        /// The message.
        message: Message,
    },

    /// The facade registered (or created) a document.
    DocRegistered {
        /// The document.
        doc_id: DocId,
        /// Shared engine handle from the registry.
        doc: SharedDoc,
        /// Shared presence store from the registry.
        ephemeral: EphemeralDocStore,
    },

    /// The local application mutated a document.
    LocalDocChanged {
        /// The document that changed.
        doc_id: DocId,
    },

    /// The local application set (or cleared, with empty data) its own
    /// presence in a namespace.
    LocalEphemeral {
        /// Scope document.
        doc_id: DocId,
        /// Presence namespace.
        namespace: String,
        /// Presence bytes; empty deletes.
        data: Vec<u8>,
    },

    /// The facade asked to delete a document everywhere.
    DeleteDoc {
        /// The document to delete.
        doc_id: DocId,
    },

    /// Periodic heartbeat: sweep TTLs, rebroadcast presence.
    HeartbeatTick,
}
