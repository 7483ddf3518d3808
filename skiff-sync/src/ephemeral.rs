//! Per-document ephemeral (presence) state.
//!
//! Each document carries a store of namespace → peer → bytes. Entries
//! are not merged into the CRDT and are not persisted; they expire after
//! a TTL and an empty-bytes entry is an explicit deletion that must be
//! propagated to observers and remote peers alike.

use skiff_types::PeerId;
use skiff_wire::EphemeralEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type PresenceCallback = Arc<dyn Fn(&str, &PeerId, &[u8]) + Send + Sync>;

struct Entry {
    data: Vec<u8>,
    updated_at: Instant,
}

#[derive(Default)]
struct Inner {
    namespaces: HashMap<String, HashMap<PeerId, Entry>>,
    subscribers: HashMap<u64, PresenceCallback>,
    next_id: u64,
}

impl Inner {
    fn callbacks(&self) -> Vec<PresenceCallback> {
        self.subscribers.values().cloned().collect()
    }
}

/// Shared presence store for one document.
///
/// The executor writes remote entries; the facade writes the local
/// peer's own entries and reads everything.
#[derive(Clone, Default)]
pub struct EphemeralDocStore {
    inner: Arc<Mutex<Inner>>,
}

/// Subscription handle; dropping it removes the callback.
pub struct PresenceSubscription {
    store: EphemeralDocStore,
    id: u64,
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        let mut inner = self.store.inner.lock().expect("ephemeral store poisoned");
        inner.subscribers.remove(&self.id);
    }
}

impl EphemeralDocStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one entry; returns true if anything changed.
    ///
    /// Empty data deletes the peer's entry in that namespace.
    pub fn apply(&self, entry: &EphemeralEntry) -> bool {
        let mut inner = self.inner.lock().expect("ephemeral store poisoned");
        let changed = if entry.data.is_empty() {
            inner
                .namespaces
                .get_mut(&entry.namespace)
                .and_then(|ns| ns.remove(&entry.peer_id))
                .is_some()
        } else {
            inner
                .namespaces
                .entry(entry.namespace.clone())
                .or_default()
                .insert(
                    entry.peer_id.clone(),
                    Entry {
                        data: entry.data.clone(),
                        updated_at: Instant::now(),
                    },
                )
                .map_or(true, |previous| previous.data != entry.data)
        };
        let callbacks = if changed { inner.callbacks() } else { Vec::new() };
        drop(inner);
        for cb in callbacks {
            cb(&entry.namespace, &entry.peer_id, &entry.data);
        }
        changed
    }

    /// Reads one peer's presence in one namespace.
    #[must_use]
    pub fn get(&self, namespace: &str, peer_id: &PeerId) -> Option<Vec<u8>> {
        let inner = self.inner.lock().expect("ephemeral store poisoned");
        inner
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(peer_id))
            .map(|entry| entry.data.clone())
    }

    /// All peers with presence in a namespace.
    #[must_use]
    pub fn peers(&self, namespace: &str) -> Vec<(PeerId, Vec<u8>)> {
        let inner = self.inner.lock().expect("ephemeral store poisoned");
        inner
            .namespaces
            .get(namespace)
            .map(|ns| {
                ns.iter()
                    .map(|(peer, entry)| (peer.clone(), entry.data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every entry authored by `peer_id`, across namespaces.
    ///
    /// This is the "local snapshot" the heartbeat broadcasts when called
    /// with the local peer id.
    #[must_use]
    pub fn entries_of(&self, peer_id: &PeerId) -> Vec<EphemeralEntry> {
        let inner = self.inner.lock().expect("ephemeral store poisoned");
        inner
            .namespaces
            .iter()
            .filter_map(|(namespace, ns)| {
                ns.get(peer_id).map(|entry| EphemeralEntry {
                    peer_id: peer_id.clone(),
                    namespace: namespace.clone(),
                    data: entry.data.clone(),
                })
            })
            .collect()
    }

    /// Deletes every entry of a departed peer, returning the deletion
    /// entries (empty data) to broadcast.
    pub fn remove_peer(&self, peer_id: &PeerId) -> Vec<EphemeralEntry> {
        let mut inner = self.inner.lock().expect("ephemeral store poisoned");
        let mut deletions = Vec::new();
        for (namespace, ns) in &mut inner.namespaces {
            if ns.remove(peer_id).is_some() {
                deletions.push(EphemeralEntry {
                    peer_id: peer_id.clone(),
                    namespace: namespace.clone(),
                    data: Vec::new(),
                });
            }
        }
        let callbacks = inner.callbacks();
        drop(inner);
        for deletion in &deletions {
            for cb in &callbacks {
                cb(&deletion.namespace, peer_id, &[]);
            }
        }
        deletions
    }

    /// Drops entries older than `ttl`, notifying observers. Entries
    /// authored by `keep` (the local peer) never expire — they are
    /// cleared explicitly or on disconnect.
    pub fn sweep(&self, ttl: Duration, keep: Option<&PeerId>) {
        let mut inner = self.inner.lock().expect("ephemeral store poisoned");
        let mut expired = Vec::new();
        for (namespace, ns) in &mut inner.namespaces {
            ns.retain(|peer, entry| {
                let retain = Some(peer) == keep || entry.updated_at.elapsed() < ttl;
                if !retain {
                    expired.push((namespace.clone(), peer.clone()));
                }
                retain
            });
        }
        let callbacks = inner.callbacks();
        drop(inner);
        for (namespace, peer) in expired {
            for cb in &callbacks {
                cb(&namespace, &peer, &[]);
            }
        }
    }

    /// Refreshes the timestamp of `peer_id`'s entries (heartbeat receipt).
    pub fn touch_peer(&self, peer_id: &PeerId) {
        let mut inner = self.inner.lock().expect("ephemeral store poisoned");
        for ns in inner.namespaces.values_mut() {
            if let Some(entry) = ns.get_mut(peer_id) {
                entry.updated_at = Instant::now();
            }
        }
    }

    /// Registers a presence callback `(namespace, peer, data)`; empty
    /// data signals deletion.
    pub fn subscribe(
        &self,
        cb: impl Fn(&str, &PeerId, &[u8]) + Send + Sync + 'static,
    ) -> PresenceSubscription {
        let mut inner = self.inner.lock().expect("ephemeral store poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, Arc::new(cb));
        drop(inner);
        PresenceSubscription {
            store: self.clone(),
            id,
        }
    }
}
