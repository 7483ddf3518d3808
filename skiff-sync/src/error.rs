//! Error types for the synchronizer.

use crate::ready::ReadyState;
use skiff_types::{ChannelKind, DocId, PeerId};
use std::time::Duration;
use thiserror::Error;

/// Result type for synchronizer operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced to callers of the synchronizer and facade.
#[derive(Debug, Error)]
pub enum SyncError {
    /// `wait_for_sync` was asked about a channel kind no adapter provides.
    #[error("no adapters available for the requested channel kind")]
    NoAdapters {
        /// The requested kind; `None` means "any".
        kind: Option<ChannelKind>,
    },

    /// `wait_for_sync` exceeded its bounded wait.
    #[error("sync wait for {doc_id} timed out after {timeout:?}")]
    SyncTimeout {
        /// The requested kind; `None` means "any".
        kind: Option<ChannelKind>,
        /// The configured bound.
        timeout: Duration,
        /// Document being waited on.
        doc_id: DocId,
        /// Per-peer states at the moment of expiry, for diagnosis.
        ready: Vec<(PeerId, ReadyState)>,
    },

    /// `wait_for_sync` was aborted through its cancellation token.
    #[error("sync wait for {doc_id} aborted")]
    Aborted {
        /// Document being waited on.
        doc_id: DocId,
    },

    /// The synchronizer task is gone.
    #[error("synchronizer has shut down")]
    Shutdown,
}
