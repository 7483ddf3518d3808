//! Presence accessors for one document namespace.

use skiff_sync::{EphemeralDocStore, PresenceSubscription, SyncEvent, SynchronizerHandle};
use skiff_types::{DocId, PeerId};

/// Read/write access to one presence namespace of one document.
pub struct Presence {
    doc_id: DocId,
    namespace: String,
    store: EphemeralDocStore,
    handle: SynchronizerHandle,
}

impl Presence {
    pub(crate) fn new(
        doc_id: DocId,
        namespace: String,
        store: EphemeralDocStore,
        handle: SynchronizerHandle,
    ) -> Self {
        Self {
            doc_id,
            namespace,
            store,
            handle,
        }
    }

    /// Sets our own presence value and broadcasts it.
    pub fn set_self(&self, data: Vec<u8>) {
        self.handle.enqueue(SyncEvent::LocalEphemeral {
            doc_id: self.doc_id.clone(),
            namespace: self.namespace.clone(),
            data,
        });
    }

    /// Clears our own presence value; peers see a deletion.
    pub fn clear_self(&self) {
        self.set_self(Vec::new());
    }

    /// Our current value, if set.
    #[must_use]
    pub fn self_value(&self) -> Option<Vec<u8>> {
        self.store
            .get(&self.namespace, &self.handle.identity().peer_id)
    }

    /// One peer's current value.
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<Vec<u8>> {
        self.store.get(&self.namespace, peer_id)
    }

    /// All remote peers with a value in this namespace.
    #[must_use]
    pub fn peers(&self) -> Vec<(PeerId, Vec<u8>)> {
        let local = &self.handle.identity().peer_id;
        self.store
            .peers(&self.namespace)
            .into_iter()
            .filter(|(peer, _)| peer != local)
            .collect()
    }

    /// Registers a callback for changes in this namespace; empty data
    /// signals deletion.
    pub fn subscribe(
        &self,
        cb: impl Fn(&PeerId, &[u8]) + Send + Sync + 'static,
    ) -> PresenceSubscription {
        let namespace = self.namespace.clone();
        self.store.subscribe(move |ns, peer, data| {
            if ns == namespace {
                cb(peer, data);
            }
        })
    }
}
