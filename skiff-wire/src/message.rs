//! Wire message model.
//!
//! One variant per message type on the wire; the numeric discriminator
//! space is partitioned by protocol phase (establishment, sync,
//! discovery, deletion, ephemeral, batch). Constructors cover the
//! common shapes the synchronizer produces.

use skiff_crdt::VersionVector;
use skiff_types::{DocId, PeerId, PeerInfo};

/// Establishment phase.
pub const TYPE_ESTABLISH_REQUEST: u8 = 0x01;
pub const TYPE_ESTABLISH_RESPONSE: u8 = 0x02;
/// Sync phase.
pub const TYPE_SYNC_REQUEST: u8 = 0x10;
pub const TYPE_SYNC_RESPONSE: u8 = 0x11;
pub const TYPE_UPDATE: u8 = 0x12;
/// Discovery.
pub const TYPE_DIRECTORY_REQUEST: u8 = 0x20;
pub const TYPE_DIRECTORY_RESPONSE: u8 = 0x21;
pub const TYPE_NEW_DOC: u8 = 0x22;
/// Deletion.
pub const TYPE_DELETE_REQUEST: u8 = 0x30;
pub const TYPE_DELETE_RESPONSE: u8 = 0x31;
/// Presence relay.
pub const TYPE_EPHEMERAL: u8 = 0x40;
/// Aggregation.
pub const TYPE_BATCH: u8 = 0x50;

/// A message as exchanged between peers.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Initiator's identity, sent on a fresh channel.
    EstablishRequest {
        /// Sender identity.
        identity: PeerInfo,
    },

    /// Acceptor's identity, completing the handshake.
    EstablishResponse {
        /// Sender identity.
        identity: PeerInfo,
    },

    /// Ask a peer for document state.
    SyncRequest {
        /// Document being requested.
        doc_id: DocId,
        /// Requester's current version; empty when the requester holds
        /// nothing.
        requester_version: VersionVector,
        /// When true, the responder follows up with its own request.
        bidirectional: bool,
        /// Piggybacked presence entries.
        ephemeral: Vec<EphemeralEntry>,
    },

    /// Answer to a sync request.
    SyncResponse {
        /// Document the response is about.
        doc_id: DocId,
        /// What (if anything) is being transmitted.
        transmission: Transmission,
        /// Piggybacked presence entries.
        ephemeral: Vec<EphemeralEntry>,
    },

    /// Unsolicited push of document bytes.
    Update {
        /// Document the payload belongs to.
        doc_id: DocId,
        /// The transmitted state.
        transmission: Transmission,
    },

    /// Ask a peer which documents it holds.
    DirectoryRequest {
        /// Restrict the answer to these ids; `None` asks for everything.
        doc_ids: Option<Vec<DocId>>,
    },

    /// Answer to a directory request.
    DirectoryResponse {
        /// Documents the sender is willing to reveal.
        doc_ids: Vec<DocId>,
    },

    /// Announcement of freshly created documents.
    NewDoc {
        /// The new document ids.
        doc_ids: Vec<DocId>,
    },

    /// Ask a peer to delete a document.
    DeleteRequest {
        /// Document to delete.
        doc_id: DocId,
    },

    /// Answer to a delete request.
    DeleteResponse {
        /// Document the answer is about.
        doc_id: DocId,
        /// Whether the receiver complied.
        status: DeleteStatus,
    },

    /// Hop-bounded presence relay.
    Ephemeral(EphemeralMessage),

    /// Several messages in one payload. Never nested.
    Batch {
        /// The aggregated messages.
        messages: Vec<Message>,
    },
}

/// Document state carried by a sync response or update.
#[derive(Debug, Clone, PartialEq)]
pub enum Transmission {
    /// Requester already has everything; only the version is echoed.
    UpToDate {
        /// Responder's version.
        version: VersionVector,
    },
    /// Full state for a requester starting from nothing (or far behind).
    Snapshot {
        /// Engine snapshot export.
        data: Vec<u8>,
        /// Version of the exported state.
        version: VersionVector,
    },
    /// Delta for a requester that is merely behind.
    Update {
        /// Engine delta export.
        data: Vec<u8>,
        /// Version of the exported state.
        version: VersionVector,
    },
    /// The responder does not hold (or will not reveal) the document.
    Unavailable,
}

impl Transmission {
    /// True when the variant carries document bytes.
    #[must_use]
    pub fn has_data(&self) -> bool {
        matches!(self, Self::Snapshot { .. } | Self::Update { .. })
    }
}

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// The receiver dropped the document.
    Deleted,
    /// The receiver kept it (unknown doc or rule denial — the requester
    /// cannot tell which).
    Ignored,
}

/// One peer's presence payload in one namespace.
///
/// Empty `data` is an explicit deletion and must be propagated like any
/// other entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralEntry {
    /// The peer the presence belongs to (not necessarily the sender —
    /// relayed entries keep their original author).
    pub peer_id: PeerId,
    /// Application namespace, e.g. `"presence"`.
    pub namespace: String,
    /// Opaque presence bytes; empty means "deleted".
    pub data: Vec<u8>,
}

/// A standalone ephemeral relay message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralMessage {
    /// Document the presence is scoped to.
    pub doc_id: DocId,
    /// Remaining relay hops; zero stops forwarding.
    pub hops_remaining: u32,
    /// The presence entries, forwarded verbatim on relay.
    pub stores: Vec<EphemeralEntry>,
}

impl Message {
    /// Sync request without piggybacked presence.
    #[must_use]
    pub fn sync_request(doc_id: DocId, requester_version: VersionVector, bidirectional: bool) -> Self {
        Self::SyncRequest {
            doc_id,
            requester_version,
            bidirectional,
            ephemeral: Vec::new(),
        }
    }

    /// Sync response without piggybacked presence.
    #[must_use]
    pub fn sync_response(doc_id: DocId, transmission: Transmission) -> Self {
        Self::SyncResponse {
            doc_id,
            transmission,
            ephemeral: Vec::new(),
        }
    }

    /// The numeric discriminator this message encodes with.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Self::EstablishRequest { .. } => TYPE_ESTABLISH_REQUEST,
            Self::EstablishResponse { .. } => TYPE_ESTABLISH_RESPONSE,
            Self::SyncRequest { .. } => TYPE_SYNC_REQUEST,
            Self::SyncResponse { .. } => TYPE_SYNC_RESPONSE,
            Self::Update { .. } => TYPE_UPDATE,
            Self::DirectoryRequest { .. } => TYPE_DIRECTORY_REQUEST,
            Self::DirectoryResponse { .. } => TYPE_DIRECTORY_RESPONSE,
            Self::NewDoc { .. } => TYPE_NEW_DOC,
            Self::DeleteRequest { .. } => TYPE_DELETE_REQUEST,
            Self::DeleteResponse { .. } => TYPE_DELETE_RESPONSE,
            Self::Ephemeral(_) => TYPE_EPHEMERAL,
            Self::Batch { .. } => TYPE_BATCH,
        }
    }

    /// Flattens nested batches into a flat message list.
    ///
    /// Nested batches are forbidden on the wire; senders call this before
    /// framing so any inner batch is expanded.
    #[must_use]
    pub fn flatten(messages: Vec<Message>) -> Vec<Message> {
        let mut flat = Vec::with_capacity(messages.len());
        for message in messages {
            match message {
                Self::Batch { messages: inner } => flat.extend(Self::flatten(inner)),
                other => flat.push(other),
            }
        }
        flat
    }
}
