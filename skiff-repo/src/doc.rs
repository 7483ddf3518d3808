//! Document handles and sync capabilities.

use crate::presence::Presence;
use skiff_crdt::{CrdtDoc, DocChange, SubscriptionId, VersionVector};
use skiff_sync::{
    DocShared, ReadyState, ReadySubscription, SyncError, SyncEvent, SyncResult,
    SynchronizerHandle,
};
use skiff_types::{ChannelKind, DocId, PeerId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A document bound to a repo.
///
/// Clones share the same underlying engine handle; the engine is never
/// duplicated per document id.
#[derive(Clone)]
pub struct DocHandle {
    doc_id: DocId,
    shared: DocShared,
    handle: SynchronizerHandle,
}

impl DocHandle {
    pub(crate) fn new(doc_id: DocId, shared: DocShared, handle: SynchronizerHandle) -> Self {
        Self {
            doc_id,
            shared,
            handle,
        }
    }

    /// The document id.
    #[must_use]
    pub fn id(&self) -> &DocId {
        &self.doc_id
    }

    /// Runs a closure with read access to the engine.
    pub fn with_doc<R>(&self, f: impl FnOnce(&dyn CrdtDoc) -> R) -> R {
        let doc = self.shared.doc.lock().expect("doc handle poisoned");
        f(doc.as_ref())
    }

    /// Runs a closure with mutable access to the engine.
    ///
    /// Local mutations fire the engine's change callbacks, which is how
    /// the synchronizer learns to push updates to subscribed peers.
    pub fn with_doc_mut<R>(&self, f: impl FnOnce(&mut dyn CrdtDoc) -> R) -> R {
        let mut doc = self.shared.doc.lock().expect("doc handle poisoned");
        f(doc.as_mut())
    }

    /// Current version vector.
    #[must_use]
    pub fn version(&self) -> VersionVector {
        self.with_doc(|doc| doc.version())
    }

    /// Current operation count.
    #[must_use]
    pub fn op_count(&self) -> u64 {
        self.with_doc(|doc| doc.op_count())
    }

    pub(crate) fn shared(&self) -> &DocShared {
        &self.shared
    }

    pub(crate) fn synchronizer(&self) -> &SynchronizerHandle {
        &self.handle
    }
}

/// Options for [`SyncAccess::wait_for_sync`].
#[derive(Default)]
pub struct WaitOptions {
    /// Restrict the wait to peers reached through this channel kind;
    /// `None` accepts any peer.
    pub kind: Option<ChannelKind>,
    /// Overall bound; `None` uses the repo default, zero disables.
    pub timeout: Option<Duration>,
    /// Optional abort signal.
    pub cancel: Option<CancellationToken>,
}

/// Sync capabilities of one document. Obtained via [`sync`].
pub struct SyncAccess<'a> {
    doc: &'a DocHandle,
}

/// Returns the sync capabilities of a document handle.
#[must_use]
pub fn sync(doc: &DocHandle) -> SyncAccess<'_> {
    SyncAccess { doc }
}

impl SyncAccess<'_> {
    /// Resolves once the document reaches `Synced` or `Absent` with any
    /// peer of the requested kind.
    ///
    /// Exactly one of three outcomes fires: resolution, a timeout error,
    /// or an abort error; the waiter is released in all three.
    pub async fn wait_for_sync(&self, opts: WaitOptions) -> SyncResult<()> {
        let handle = self.doc.synchronizer();
        let ready = &handle.ready;

        let covered = match opts.kind {
            Some(kind) => ready.has_adapter_kind(kind),
            None => {
                ready.has_adapter_kind(ChannelKind::Network)
                    || ready.has_adapter_kind(ChannelKind::Storage)
                    || ready.has_adapter_kind(ChannelKind::Other)
            }
        };
        if !covered {
            return Err(SyncError::NoAdapters { kind: opts.kind });
        }

        if ready
            .terminal_state(self.doc.id(), opts.kind)
            .is_some()
        {
            return Ok(());
        }

        let (_guard, rx) = ready.register_waiter(self.doc.id().clone(), opts.kind);

        let timeout = opts.timeout.unwrap_or(handle.config().wait_timeout);
        let cancel = opts.cancel.unwrap_or_default();

        let wait = async {
            match rx.await {
                Ok(_terminal) => Ok(()),
                Err(_) => Err(SyncError::Shutdown),
            }
        };

        if timeout.is_zero() {
            tokio::select! {
                outcome = wait => outcome,
                () = cancel.cancelled() => Err(SyncError::Aborted {
                    doc_id: self.doc.id().clone(),
                }),
            }
        } else {
            tokio::select! {
                outcome = wait => outcome,
                () = cancel.cancelled() => Err(SyncError::Aborted {
                    doc_id: self.doc.id().clone(),
                }),
                () = tokio::time::sleep(timeout) => Err(SyncError::SyncTimeout {
                    kind: opts.kind,
                    timeout,
                    doc_id: self.doc.id().clone(),
                    ready: self.ready_states(),
                }),
            }
        }
    }

    /// Snapshot of per-peer ready states.
    #[must_use]
    pub fn ready_states(&self) -> Vec<(PeerId, ReadyState)> {
        self.doc.synchronizer().ready.states_for(self.doc.id())
    }

    /// Registers a ready-state callback for this document.
    pub fn on_ready_state_change(
        &self,
        cb: impl Fn(&PeerId, ReadyState) + Send + Sync + 'static,
    ) -> ReadySubscription {
        let doc_id = self.doc.id().clone();
        self.doc
            .synchronizer()
            .ready
            .subscribe(move |changed_doc, peer, state| {
                if *changed_doc == doc_id {
                    cb(peer, state);
                }
            })
    }

    /// Registers a callback fired on every committed CRDT change.
    pub fn subscribe(&self, cb: impl FnMut(&DocChange) + Send + 'static) -> DocSubscription {
        let id = self
            .doc
            .shared()
            .doc
            .lock()
            .expect("doc handle poisoned")
            .subscribe(Box::new(cb));
        DocSubscription {
            doc: self.doc.shared().doc.clone(),
            id,
        }
    }

    /// Presence accessors for one namespace.
    #[must_use]
    pub fn presence(&self, namespace: &str) -> Presence {
        Presence::new(
            self.doc.id().clone(),
            namespace.to_string(),
            self.doc.shared().ephemeral.clone(),
            self.doc.synchronizer().clone(),
        )
    }
}

/// Engine change subscription; dropping it unsubscribes.
pub struct DocSubscription {
    doc: Arc<std::sync::Mutex<Box<dyn CrdtDoc>>>,
    id: SubscriptionId,
}

impl Drop for DocSubscription {
    fn drop(&mut self) {
        if let Ok(mut doc) = self.doc.lock() {
            doc.unsubscribe(self.id);
        }
    }
}

impl DocHandle {
    /// Convenience passthrough for the common "write then let the
    /// synchronizer push" flow used by applications that do not hold the
    /// engine trait in scope.
    pub fn notify_changed(&self) {
        self.handle.enqueue(SyncEvent::LocalDocChanged {
            doc_id: self.doc_id.clone(),
        });
    }
}
