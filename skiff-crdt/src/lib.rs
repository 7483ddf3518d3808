//! CRDT engine contract for the skiff replication core.
//!
//! The core never looks inside a document: it imports and exports opaque
//! byte payloads, reads version vectors, and asks the engine to compare
//! them. Any engine implementing [`CrdtDoc`] can be replicated — the
//! in-memory [`MockDoc`] ships for tests and as a reference of the
//! expected semantics.

mod engine;
mod mock;
mod version;

pub use engine::{ChangeOrigin, CrdtDoc, DocChange, EngineError, ExportMode, SubscriptionId};
pub use mock::MockDoc;
pub use version::{CausalOrder, VersionVector};
