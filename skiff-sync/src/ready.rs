//! Per-document, per-peer ready states and their observers.
//!
//! The executor publishes state transitions here; the facade reads
//! snapshots, registers change callbacks, and parks `wait_for_sync`
//! waiters. `Synced` and `Absent` are the two terminal states a waiter
//! resolves on.

use skiff_types::{ChannelKind, DocId, PeerId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Aggregated status of one document with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Channel present, establishment incomplete.
    Connecting,
    /// Established, sync request outstanding.
    Syncing,
    /// Last sync response was data (applied) or up-to-date.
    Synced,
    /// Last sync response was unavailable.
    Absent,
    /// The channel to the peer went away.
    Disconnected,
}

impl ReadyState {
    /// True for the two states `wait_for_sync` resolves on.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Absent)
    }
}

type ChangeCallback = Arc<dyn Fn(&DocId, &PeerId, ReadyState) + Send + Sync>;

struct Waiter {
    doc_id: DocId,
    kind: Option<ChannelKind>,
    tx: oneshot::Sender<ReadyState>,
}

#[derive(Default)]
struct Inner {
    /// doc → peer → (state, kind of the channel that produced it).
    states: HashMap<DocId, HashMap<PeerId, (ReadyState, ChannelKind)>>,
    waiters: HashMap<u64, Waiter>,
    subscribers: HashMap<u64, ChangeCallback>,
    /// Channel kinds with at least one registered adapter.
    adapter_kinds: Vec<ChannelKind>,
    next_id: u64,
}

/// Shared hub publishing ready-state transitions.
#[derive(Clone, Default)]
pub struct ReadyTracker {
    inner: Arc<Mutex<Inner>>,
}

/// Handle returned by [`ReadyTracker::register_waiter`]; dropping it
/// without a resolution unregisters the waiter.
pub struct WaiterGuard {
    tracker: ReadyTracker,
    id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let mut inner = self.tracker.inner.lock().expect("ready tracker poisoned");
        inner.waiters.remove(&self.id);
    }
}

/// Handle returned by [`ReadyTracker::subscribe`]; dropping it removes
/// the callback.
pub struct ReadySubscription {
    tracker: ReadyTracker,
    id: u64,
}

impl Drop for ReadySubscription {
    fn drop(&mut self) {
        let mut inner = self.tracker.inner.lock().expect("ready tracker poisoned");
        inner.subscribers.remove(&self.id);
    }
}

impl ReadyTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that an adapter of `kind` exists (consulted by waiters).
    pub fn note_adapter_kind(&self, kind: ChannelKind) {
        let mut inner = self.inner.lock().expect("ready tracker poisoned");
        if !inner.adapter_kinds.contains(&kind) {
            inner.adapter_kinds.push(kind);
        }
    }

    /// True if any adapter of `kind` has been registered.
    #[must_use]
    pub fn has_adapter_kind(&self, kind: ChannelKind) -> bool {
        let inner = self.inner.lock().expect("ready tracker poisoned");
        inner.adapter_kinds.contains(&kind)
    }

    /// Publishes a transition and fires subscribers and matching waiters.
    pub fn set(&self, doc_id: &DocId, peer_id: &PeerId, kind: ChannelKind, state: ReadyState) {
        let mut inner = self.inner.lock().expect("ready tracker poisoned");
        let previous = inner
            .states
            .entry(doc_id.clone())
            .or_default()
            .insert(peer_id.clone(), (state, kind));
        if previous.map(|(s, _)| s) == Some(state) {
            return;
        }

        if state.is_terminal() {
            let resolved: Vec<u64> = inner
                .waiters
                .iter()
                .filter(|(_, w)| {
                    w.doc_id == *doc_id && w.kind.map_or(true, |k| k == kind)
                })
                .map(|(id, _)| *id)
                .collect();
            for id in resolved {
                if let Some(waiter) = inner.waiters.remove(&id) {
                    let _ = waiter.tx.send(state);
                }
            }
        }

        // Run callbacks outside the lock; they may call back in.
        let callbacks: Vec<ChangeCallback> = inner.subscribers.values().cloned().collect();
        drop(inner);
        for cb in callbacks {
            cb(doc_id, peer_id, state);
        }
    }

    /// Removes all state for a document (deletion path).
    pub fn remove_doc(&self, doc_id: &DocId) {
        let mut inner = self.inner.lock().expect("ready tracker poisoned");
        inner.states.remove(doc_id);
    }

    /// Snapshot of per-peer states for a document.
    #[must_use]
    pub fn states_for(&self, doc_id: &DocId) -> Vec<(PeerId, ReadyState)> {
        let inner = self.inner.lock().expect("ready tracker poisoned");
        inner
            .states
            .get(doc_id)
            .map(|peers| {
                peers
                    .iter()
                    .map(|(peer, (state, _))| (peer.clone(), *state))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current terminal state for the doc if one peer of the kind has
    /// already reached one.
    #[must_use]
    pub fn terminal_state(&self, doc_id: &DocId, kind: Option<ChannelKind>) -> Option<ReadyState> {
        let inner = self.inner.lock().expect("ready tracker poisoned");
        inner.states.get(doc_id).and_then(|peers| {
            peers
                .values()
                .filter(|(state, k)| state.is_terminal() && kind.map_or(true, |want| want == *k))
                .map(|(state, _)| *state)
                .next()
        })
    }

    /// Parks a waiter resolved on the doc's first terminal state for the
    /// requested kind.
    pub fn register_waiter(
        &self,
        doc_id: DocId,
        kind: Option<ChannelKind>,
    ) -> (WaiterGuard, oneshot::Receiver<ReadyState>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().expect("ready tracker poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.waiters.insert(id, Waiter { doc_id, kind, tx });
        drop(inner);
        (
            WaiterGuard {
                tracker: self.clone(),
                id,
            },
            rx,
        )
    }

    /// Registers a change callback.
    pub fn subscribe(
        &self,
        cb: impl Fn(&DocId, &PeerId, ReadyState) + Send + Sync + 'static,
    ) -> ReadySubscription {
        let mut inner = self.inner.lock().expect("ready tracker poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, Arc::new(cb));
        drop(inner);
        ReadySubscription {
            tracker: self.clone(),
            id,
        }
    }
}
