//! The repo: one synchronizer, many documents, pluggable adapters.

use crate::doc::DocHandle;
use skiff_sync::{
    AdapterHost, ChannelAdapter, DocRegistry, EngineFactory, SendInterceptor, SharePolicy,
    SyncConfig, SyncEvent, Synchronizer, SynchronizerHandle,
};
use skiff_types::{DocId, PeerInfo};
use std::sync::{Arc, Mutex};

/// Binds documents to a synchronizer and hands out handles.
pub struct Repo {
    handle: SynchronizerHandle,
    adapters: Mutex<Vec<Arc<AdapterHost>>>,
}

impl Repo {
    /// Creates a repo with the default allow-all rules.
    #[must_use]
    pub fn new(identity: PeerInfo, config: SyncConfig, factory: EngineFactory) -> Self {
        Self::with_policy(identity, config, factory, Arc::new(skiff_sync::AllowAll))
    }

    /// Creates a repo with custom access rules.
    #[must_use]
    pub fn with_policy(
        identity: PeerInfo,
        config: SyncConfig,
        factory: EngineFactory,
        policy: Arc<dyn SharePolicy>,
    ) -> Self {
        let registry = DocRegistry::new(factory);
        let handle = Synchronizer::spawn(identity, config, policy, registry);
        Self {
            handle,
            adapters: Mutex::new(Vec::new()),
        }
    }

    /// Our identity.
    #[must_use]
    pub fn identity(&self) -> &PeerInfo {
        self.handle.identity()
    }

    /// The synchronizer handle (adapter plumbing, tests).
    #[must_use]
    pub fn handle(&self) -> &SynchronizerHandle {
        &self.handle
    }

    /// Plugs in an adapter with no interceptors.
    pub fn add_adapter(&self, adapter: Arc<dyn ChannelAdapter>) -> Arc<AdapterHost> {
        self.add_adapter_with_interceptors(adapter, Vec::new())
    }

    /// Plugs in an adapter with a send interceptor chain.
    pub fn add_adapter_with_interceptors(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        interceptors: Vec<Arc<dyn SendInterceptor>>,
    ) -> Arc<AdapterHost> {
        let host = AdapterHost::new(adapter, self.handle.clone(), interceptors);
        self.adapters
            .lock()
            .expect("adapter list poisoned")
            .push(host.clone());
        host
    }

    /// Returns the document, creating it locally empty on first sight.
    ///
    /// Synchronous: the handle is usable immediately; the synchronizer
    /// learns about the document through the queue.
    #[must_use]
    pub fn get(&self, doc_id: DocId) -> DocHandle {
        let (shared, created) = self.handle.registry.get_or_create(&doc_id);
        if created {
            tracing::debug!(%doc_id, "created local document");
        }
        self.handle.enqueue(SyncEvent::DocRegistered {
            doc_id: doc_id.clone(),
            doc: shared.doc.clone(),
            ephemeral: shared.ephemeral.clone(),
        });
        DocHandle::new(doc_id, shared, self.handle.clone())
    }

    /// Deletes a document locally and asks subscribed peers to do the
    /// same (they may ignore the request).
    pub fn delete(&self, doc_id: &DocId) {
        self.handle.enqueue(SyncEvent::DeleteDoc {
            doc_id: doc_id.clone(),
        });
    }
}
