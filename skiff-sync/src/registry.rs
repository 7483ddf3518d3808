//! Shared document registry.
//!
//! The facade and the synchronizer must agree on exactly one engine
//! handle per document id — the registry is that agreement. Whoever sees
//! a document first (a facade `get` or a `can_create`-gated sync
//! request) creates the handle; everyone else receives clones of the
//! same `Arc`s.

use crate::ephemeral::EphemeralDocStore;
use crate::model::SharedDoc;
use skiff_crdt::CrdtDoc;
use skiff_types::DocId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Factory producing empty engine instances for new documents.
pub type EngineFactory = Arc<dyn Fn(&DocId) -> Box<dyn CrdtDoc> + Send + Sync>;

/// The shared handles for one document.
#[derive(Clone)]
pub struct DocShared {
    /// The engine handle.
    pub doc: SharedDoc,
    /// The presence store.
    pub ephemeral: EphemeralDocStore,
}

/// Process-wide map from document id to its unique shared handles.
#[derive(Clone)]
pub struct DocRegistry {
    factory: EngineFactory,
    inner: Arc<Mutex<HashMap<DocId, DocShared>>>,
}

impl DocRegistry {
    /// Creates a registry backed by an engine factory.
    #[must_use]
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Looks up a document, creating an empty one on miss.
    ///
    /// Returns the shared handles and whether this call created them.
    pub fn get_or_create(&self, doc_id: &DocId) -> (DocShared, bool) {
        let mut inner = self.inner.lock().expect("doc registry poisoned");
        if let Some(existing) = inner.get(doc_id) {
            return (existing.clone(), false);
        }
        let shared = DocShared {
            doc: Arc::new(Mutex::new((self.factory)(doc_id))),
            ephemeral: EphemeralDocStore::new(),
        };
        inner.insert(doc_id.clone(), shared.clone());
        (shared, true)
    }

    /// Looks up a document without creating it.
    #[must_use]
    pub fn get(&self, doc_id: &DocId) -> Option<DocShared> {
        let inner = self.inner.lock().expect("doc registry poisoned");
        inner.get(doc_id).cloned()
    }

    /// Forgets a document (deletion path).
    pub fn remove(&self, doc_id: &DocId) {
        let mut inner = self.inner.lock().expect("doc registry poisoned");
        inner.remove(doc_id);
    }

    /// All registered ids, sorted.
    #[must_use]
    pub fn doc_ids(&self) -> Vec<DocId> {
        let inner = self.inner.lock().expect("doc registry poisoned");
        let mut ids: Vec<DocId> = inner.keys().cloned().collect();
        ids.sort();
        ids
    }
}
