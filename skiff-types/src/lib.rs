//! Shared identifier and identity types for the skiff replication core.
//!
//! Everything here is deliberately small: string-backed newtypes for the
//! three naming spaces (documents, peers, channels/adapters) and the peer
//! identity exchanged during channel establishment. The CRDT engine,
//! wire format, and synchronizer all build on these.

mod ids;
mod peer;

pub use ids::{AdapterId, AdapterType, ChannelId, DocId, PeerId};
pub use peer::{ChannelKind, PeerInfo};
