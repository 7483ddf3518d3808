//! The command executor: the only code that mutates the world.
//!
//! Applies command lists produced by handlers — model mutation, engine
//! imports, presence writes, ready-state publication — and flushes
//! queued sends per channel at the end of each list, batching multiple
//! messages to one channel into a single batch frame.

use crate::command::Command;
use crate::config::SyncConfig;
use crate::event::SyncEvent;
use crate::model::{Channel, ChannelState, DocState, PeerState, SyncModel};
use crate::ready::ReadyTracker;
use crate::registry::DocRegistry;
use crate::rules::SharePolicy;
use skiff_crdt::ChangeOrigin;
use skiff_types::{ChannelId, DocId, PeerInfo};
use skiff_wire::{EphemeralMessage, Message, Transmission};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the model and applies commands to it.
pub struct Executor {
    /// The model; handlers read it between command batches.
    pub model: SyncModel,
    registry: DocRegistry,
    ready: ReadyTracker,
    identity: PeerInfo,
    config: SyncConfig,
    policy: Arc<dyn SharePolicy>,
    /// Loops synthesized events (send failures, local changes) back into
    /// the work queue.
    queue: mpsc::UnboundedSender<SyncEvent>,
}

impl Executor {
    /// Creates an executor around an empty model.
    pub fn new(
        identity: PeerInfo,
        config: SyncConfig,
        policy: Arc<dyn SharePolicy>,
        registry: DocRegistry,
        ready: ReadyTracker,
        queue: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            model: SyncModel::new(),
            registry,
            ready,
            identity,
            config,
            policy,
            queue,
        }
    }

    /// Applies a command list, then flushes sends in enqueue order.
    pub fn run(&mut self, commands: Vec<Command>) {
        let mut sends: Vec<(ChannelId, Message)> = Vec::new();
        for command in commands {
            self.apply(command, &mut sends);
        }
        self.flush(sends);
    }

    fn apply(&mut self, command: Command, sends: &mut Vec<(ChannelId, Message)>) {
        match command {
            Command::InsertChannel {
                channel_id,
                adapter_type,
                adapter_id,
                kind,
                outbound,
            } => {
                info!(%channel_id, %adapter_type, "channel added");
                self.model.channels.insert(
                    channel_id,
                    Channel {
                        id: channel_id,
                        adapter_type,
                        adapter_id,
                        kind,
                        state: ChannelState::Connected,
                        outbound,
                    },
                );
            }

            Command::Send {
                channel_id,
                message,
            } => sends.push((channel_id, message)),

            Command::UpgradeChannel {
                channel_id,
                identity,
            } => self.upgrade_channel(channel_id, identity),

            Command::RemoveChannel { channel_id } => self.remove_channel(channel_id),

            Command::EnsureDoc { doc_id, doc } => self.ensure_doc(&doc_id, doc),

            Command::SubscribeChannel {
                doc_id,
                channel_id,
            } => {
                if let Some(state) = self.model.documents.get_mut(&doc_id) {
                    state.subscribers.insert(channel_id);
                }
                let peer_id = self
                    .model
                    .channels
                    .get(&channel_id)
                    .and_then(|ch| ch.peer_id().cloned());
                if let Some(peer_id) = peer_id {
                    if let Some(peer) = self.model.peers.get_mut(&peer_id) {
                        peer.subscriptions.insert(doc_id);
                    }
                }
            }

            Command::ImportDoc {
                doc_id,
                data,
                remote_version,
                source,
            } => self.import_doc(&doc_id, &data, remote_version, source, sends),

            Command::SetAwareness {
                peer_id,
                doc_id,
                awareness,
            } => {
                if let Some(peer) = self.model.peers.get_mut(&peer_id) {
                    peer.awareness.insert(doc_id.clone(), awareness);
                }
                // A sync exchange proves the peer alive; keep its
                // presence from expiring between heartbeats.
                if let Some(state) = self.model.documents.get(&doc_id) {
                    state.ephemeral.touch_peer(&peer_id);
                }
            }

            Command::SetReady {
                doc_id,
                peer_id,
                kind,
                state,
            } => self.ready.set(&doc_id, &peer_id, kind, state),

            Command::ApplyEphemeral { doc_id, entries } => {
                if let Some(state) = self.model.documents.get(&doc_id) {
                    for entry in &entries {
                        state.ephemeral.apply(entry);
                    }
                }
            }

            Command::RemoveEphemeralPeer { peer_id } => {
                info!(%peer_id, "peer disconnected; evicting its presence");
                for doc_id in self.model.doc_ids() {
                    let Some(state) = self.model.documents.get(&doc_id) else {
                        continue;
                    };
                    let deletions = state.ephemeral.remove_peer(&peer_id);
                    if deletions.is_empty() {
                        continue;
                    }
                    let message = Message::Ephemeral(EphemeralMessage {
                        doc_id: doc_id.clone(),
                        hops_remaining: self.config.ephemeral_hops,
                        stores: deletions,
                    });
                    for target in self.model.subscribed_channels(&doc_id, None) {
                        sends.push((target, message.clone()));
                    }
                }
            }

            Command::DeleteDocLocal { doc_id } => {
                info!(%doc_id, "deleting document locally");
                self.model.documents.remove(&doc_id);
                self.registry.remove(&doc_id);
                self.ready.remove_doc(&doc_id);
                for peer in self.model.peers.values_mut() {
                    peer.subscriptions.remove(&doc_id);
                    peer.awareness.remove(&doc_id);
                }
            }
        }
    }

    fn upgrade_channel(&mut self, channel_id: ChannelId, identity: PeerInfo) {
        let Some(channel) = self.model.channels.get_mut(&channel_id) else {
            return;
        };
        let peer_id = identity.peer_id.clone();
        channel.state = ChannelState::Established(peer_id.clone());
        info!(%channel_id, %peer_id, "channel established");

        let peer = self
            .model
            .peers
            .entry(peer_id)
            .or_insert_with(|| PeerState::new(identity.clone()));
        peer.info = identity;
        peer.channels.insert(channel_id);
    }

    fn remove_channel(&mut self, channel_id: ChannelId) {
        let Some(channel) = self.model.channels.remove(&channel_id) else {
            return;
        };
        info!(%channel_id, "channel removed");
        for state in self.model.documents.values_mut() {
            state.subscribers.remove(&channel_id);
        }
        if let ChannelState::Established(peer_id) = channel.state {
            if let Some(peer) = self.model.peers.get_mut(&peer_id) {
                peer.channels.remove(&channel_id);
            }
        }
    }

    fn ensure_doc(
        &mut self,
        doc_id: &DocId,
        provided: Option<(crate::model::SharedDoc, crate::ephemeral::EphemeralDocStore)>,
    ) {
        if self.model.documents.contains_key(doc_id) {
            return;
        }
        let (doc, ephemeral) = match provided {
            Some((doc, ephemeral)) => (doc, ephemeral),
            None => {
                let (shared, created) = self.registry.get_or_create(doc_id);
                if created {
                    info!(%doc_id, "created document from remote request");
                }
                (shared.doc, shared.ephemeral)
            }
        };

        // Local mutations loop back through the queue so subscribed
        // channels receive pushes; imports are propagated by the import
        // path itself.
        let queue = self.queue.clone();
        let changed_doc = doc_id.clone();
        doc.lock()
            .expect("doc handle poisoned")
            .subscribe(Box::new(move |change| {
                if change.origin == ChangeOrigin::Local {
                    let _ = queue.send(SyncEvent::LocalDocChanged {
                        doc_id: changed_doc.clone(),
                    });
                }
            }));

        self.model
            .documents
            .insert(doc_id.clone(), DocState::new(doc, ephemeral));
    }

    fn import_doc(
        &mut self,
        doc_id: &DocId,
        data: &[u8],
        remote_version: skiff_crdt::VersionVector,
        source: ChannelId,
        sends: &mut Vec<(ChannelId, Message)>,
    ) {
        let Some(state) = self.model.documents.get(doc_id) else {
            return;
        };
        let changed = {
            let mut doc = state.doc.lock().expect("doc handle poisoned");
            if doc.is_detached() {
                // Merging into a historic checkout would silently diverge.
                if let Err(e) = doc.checkout_to_latest() {
                    warn!(%doc_id, error = %e, "checkout failed; dropping transmission");
                    return;
                }
            }
            let before = doc.version();
            if let Err(e) = doc.import(data) {
                // The message is dropped; the channel survives and the
                // peer retries on heartbeat or reconnection.
                warn!(%doc_id, error = %e, "import failed; dropping transmission");
                return;
            }
            doc.version() != before
        };
        debug!(%doc_id, changed, bytes = data.len(), "imported transmission");

        if changed {
            // Gossip the payload onward so chains of peers converge;
            // unchanged imports stop the echo.
            let message = Message::Update {
                doc_id: doc_id.clone(),
                transmission: Transmission::Update {
                    data: data.to_vec(),
                    version: remote_version,
                },
            };
            for target in self.model.subscribed_channels(doc_id, Some(source)) {
                sends.push((target, message.clone()));
            }
        }
    }

    /// Flushes queued sends: per channel, in enqueue order, coalescing
    /// multiple messages into one batch frame. A dead sink synthesizes
    /// channel removal.
    fn flush(&mut self, sends: Vec<(ChannelId, Message)>) {
        let mut order: Vec<ChannelId> = Vec::new();
        let mut grouped: std::collections::HashMap<ChannelId, Vec<Message>> =
            std::collections::HashMap::new();
        for (channel_id, message) in sends {
            if !grouped.contains_key(&channel_id) {
                order.push(channel_id);
            }
            grouped.entry(channel_id).or_default().push(message);
        }

        for channel_id in order {
            let Some(messages) = grouped.remove(&channel_id) else {
                continue;
            };
            let Some(channel) = self.model.channels.get(&channel_id) else {
                debug!(%channel_id, "dropping sends to vanished channel");
                continue;
            };
            if channel.outbound.send(messages).is_err() {
                warn!(%channel_id, "send failed; removing channel");
                let _ = self.queue.send(SyncEvent::ChannelRemoved { channel_id });
            }
        }
    }

    /// Sweeps expired presence entries on every document store.
    pub fn sweep_ephemeral(&self) {
        for state in self.model.documents.values() {
            state
                .ephemeral
                .sweep(self.config.ephemeral_ttl, Some(&self.identity.peer_id));
        }
    }

    /// Our identity (used by the handler context).
    #[must_use]
    pub fn identity(&self) -> &PeerInfo {
        &self.identity
    }

    /// The configuration (used by the handler context).
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The access rules (used by the handler context).
    #[must_use]
    pub fn policy(&self) -> &dyn SharePolicy {
        self.policy.as_ref()
    }
}
