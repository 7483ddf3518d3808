//! The engine trait the synchronizer replicates against.

use crate::{CausalOrder, VersionVector};
use thiserror::Error;

/// Errors surfaced by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The payload could not be merged.
    #[error("import failed: {0}")]
    ImportFailed(String),

    /// The requested export could not be produced.
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// A version vector was not produced by this engine.
    #[error("invalid version vector: {0}")]
    InvalidVersion(String),
}

/// What to export from a document.
#[derive(Debug, Clone)]
pub enum ExportMode {
    /// Full state, importable into an empty replica.
    Snapshot,
    /// Delta containing everything unknown to the given version.
    UpdatesSince(VersionVector),
}

/// Identifies one change subscription on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Where a committed change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A local mutation through the document API.
    Local,
    /// A remote payload merged via [`CrdtDoc::import`].
    Import,
}

/// Notification payload for change subscribers.
#[derive(Debug, Clone)]
pub struct DocChange {
    /// Version after the change committed.
    pub version: VersionVector,
    /// Local edit or remote import.
    pub origin: ChangeOrigin,
}

/// Contract between the replication core and a CRDT engine.
///
/// The core owns exactly one implementation per document and treats all
/// payloads opaquely; merge semantics live entirely behind this trait.
pub trait CrdtDoc: Send + 'static {
    /// Current version vector.
    fn version(&self) -> VersionVector;

    /// Merges a remote payload (snapshot or delta) into the document.
    fn import(&mut self, bytes: &[u8]) -> Result<(), EngineError>;

    /// Exports document state in the requested mode.
    fn export(&self, mode: ExportMode) -> Result<Vec<u8>, EngineError>;

    /// Registers a change callback; fires on every committed change.
    fn subscribe(&mut self, cb: Box<dyn FnMut(&DocChange) + Send>) -> SubscriptionId;

    /// Removes a previously registered callback.
    fn unsubscribe(&mut self, id: SubscriptionId);

    /// Number of operations the document holds.
    fn op_count(&self) -> u64;

    /// True while the document is checked out at a historic version.
    fn is_detached(&self) -> bool;

    /// Returns the document to the latest version.
    fn checkout_to_latest(&mut self) -> Result<(), EngineError>;

    /// Compares two version vectors produced by this engine.
    fn compare(&self, a: &VersionVector, b: &VersionVector) -> Result<CausalOrder, EngineError>;
}
