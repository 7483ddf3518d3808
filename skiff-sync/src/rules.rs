//! Per-peer access rules.
//!
//! Five predicates, all defaulting to allow, evaluated synchronously at
//! protocol decision points. A predicate returning false is observably
//! identical to the document being absent — peers cannot distinguish a
//! denial from a miss. Rules must not perform I/O.

use crate::model::SharedDoc;
use skiff_types::{ChannelId, ChannelKind, DocId};

/// What a rule gets to look at.
///
/// Storage channels bypass rules entirely (always trusted), so contexts
/// given to a policy are always for network or other channels.
#[derive(Clone)]
pub struct RuleContext<'a> {
    /// The engine handle, for content-aware policies (op counts,
    /// versions). Absent exactly when the document does not exist yet —
    /// the `can_create` decision.
    pub doc: Option<&'a SharedDoc>,
    /// Document being decided on.
    pub doc_id: &'a DocId,
    /// Human name from the peer's establishment identity; empty before
    /// establishment completes.
    pub peer_name: &'a str,
    /// Channel the decision concerns.
    pub channel_id: ChannelId,
    /// The channel's transport class.
    pub channel_kind: ChannelKind,
}

/// Access rules consulted by the synchronizer.
///
/// Implementations override only the predicates they care about.
pub trait SharePolicy: Send + Sync + 'static {
    /// May we start (or answer) a sync for this document on this channel?
    fn can_begin_sync(&self, _ctx: &RuleContext<'_>) -> bool {
        true
    }

    /// May this peer learn that the document exists (directory listings,
    /// sync responses carrying data)?
    fn can_reveal(&self, _ctx: &RuleContext<'_>) -> bool {
        true
    }

    /// May updates pushed by this peer be applied locally?
    fn can_update(&self, _ctx: &RuleContext<'_>) -> bool {
        true
    }

    /// May this peer delete the document locally?
    fn can_delete(&self, _ctx: &RuleContext<'_>) -> bool {
        true
    }

    /// May a sync request from this peer create a document we do not
    /// have yet?
    fn can_create(&self, _ctx: &RuleContext<'_>) -> bool {
        true
    }
}

/// The default policy: everything allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SharePolicy for AllowAll {}
