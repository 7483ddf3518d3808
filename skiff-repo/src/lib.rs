//! Repo facade for the skiff replication core.
//!
//! A [`Repo`] owns one synchronizer, hands out [`DocHandle`]s bound to
//! it, and plugs adapters in. Sync capabilities for a handle come from
//! the free function [`sync`]; presence accessors hang off the result.
//!
//! ```no_run
//! use skiff_crdt::{CrdtDoc, MockDoc};
//! use skiff_repo::{Repo, WaitOptions};
//! use skiff_types::{DocId, PeerId, PeerInfo};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), skiff_sync::SyncError> {
//! let identity = PeerInfo::new(PeerId::random(), "Ana's laptop", "user");
//! let writer = identity.peer_id.to_string();
//! let repo = Repo::new(
//!     identity,
//!     Default::default(),
//!     Arc::new(move |_: &DocId| Box::new(MockDoc::new(writer.clone())) as Box<dyn CrdtDoc>),
//! );
//! let doc = repo.get("notes".into());
//! skiff_repo::sync(&doc).wait_for_sync(WaitOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

mod doc;
mod presence;
mod repo;

pub use doc::{sync, DocHandle, DocSubscription, SyncAccess, WaitOptions};
pub use presence::Presence;
pub use repo::Repo;
