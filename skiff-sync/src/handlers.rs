//! Pure protocol handlers: `(event, model) → commands`.
//!
//! Handlers never mutate anything. They read the model (including
//! engine versions, which is a read), consult rules, and return the
//! command list the executor will apply. Keeping them pure makes the
//! protocol deterministic and directly testable without channels.

use crate::command::Command;
use crate::config::SyncConfig;
use crate::event::SyncEvent;
use crate::model::{Channel, ChannelState, DocAwareness, DocState, SyncModel};
use crate::ready::ReadyState;
use crate::rules::{RuleContext, SharePolicy};
use skiff_crdt::{CausalOrder, ExportMode, VersionVector};
use skiff_types::{ChannelId, ChannelKind, DocId, PeerId, PeerInfo};
use skiff_wire::{
    DeleteStatus, EphemeralEntry, EphemeralMessage, Message, Transmission,
};
use tracing::{debug, warn};

/// Read-only context shared by all handlers.
pub struct HandlerContext<'a> {
    /// The model snapshot for this event.
    pub model: &'a SyncModel,
    /// Our own identity.
    pub identity: &'a PeerInfo,
    /// The access rules.
    pub policy: &'a dyn SharePolicy,
    /// Tunables.
    pub config: &'a SyncConfig,
}

impl HandlerContext<'_> {
    /// Evaluates a rule with the storage-trust bypass: storage channels
    /// are always allowed.
    fn allowed(
        &self,
        channel: &Channel,
        doc_id: &DocId,
        pred: impl Fn(&dyn SharePolicy, &RuleContext<'_>) -> bool,
    ) -> bool {
        if channel.kind == ChannelKind::Storage {
            return true;
        }
        let peer_name = channel
            .peer_id()
            .and_then(|p| self.model.peers.get(p))
            .map(|p| p.info.name.as_str())
            .unwrap_or("");
        let ctx = RuleContext {
            doc: self.model.documents.get(doc_id).map(|state| &state.doc),
            doc_id,
            peer_name,
            channel_id: channel.id,
            channel_kind: channel.kind,
        };
        pred(self.policy, &ctx)
    }

    fn doc_version(&self, state: &DocState) -> VersionVector {
        state.version()
    }
}

/// Dispatches one event to its handler.
pub fn handle_event(event: &SyncEvent, ctx: &HandlerContext<'_>) -> Vec<Command> {
    match event {
        SyncEvent::ChannelAdded {
            channel_id,
            adapter_type,
            adapter_id,
            kind,
            outbound,
        } => vec![Command::InsertChannel {
            channel_id: *channel_id,
            adapter_type: adapter_type.clone(),
            adapter_id: adapter_id.clone(),
            kind: *kind,
            outbound: outbound.clone(),
        }],

        SyncEvent::ChannelRemoved { channel_id } => on_channel_removed(*channel_id, ctx),

        SyncEvent::EstablishChannel { channel_id } => vec![Command::Send {
            channel_id: *channel_id,
            message: Message::EstablishRequest {
                identity: ctx.identity.clone(),
            },
        }],

        SyncEvent::Inbound {
            channel_id,
            message,
        } => handle_message(*channel_id, message, ctx),

        SyncEvent::DocRegistered {
            doc_id,
            doc,
            ephemeral,
        } => on_doc_registered(doc_id, doc, ephemeral, ctx),

        SyncEvent::LocalDocChanged { doc_id } => on_local_doc_changed(doc_id, ctx),

        SyncEvent::LocalEphemeral {
            doc_id,
            namespace,
            data,
        } => on_local_ephemeral(doc_id, namespace, data, ctx),

        SyncEvent::DeleteDoc { doc_id } => on_delete_doc(doc_id, ctx),

        SyncEvent::HeartbeatTick => on_heartbeat(ctx),
    }
}

/// Dispatches one inbound wire message.
pub fn handle_message(
    channel_id: ChannelId,
    message: &Message,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    match message {
        Message::EstablishRequest { identity } => on_establish_request(channel_id, identity, ctx),
        Message::EstablishResponse { identity } => on_establish_response(channel_id, identity, ctx),
        Message::SyncRequest {
            doc_id,
            requester_version,
            bidirectional,
            ephemeral,
        } => on_sync_request(
            channel_id,
            doc_id,
            requester_version,
            *bidirectional,
            ephemeral,
            ctx,
        ),
        Message::SyncResponse {
            doc_id,
            transmission,
            ephemeral,
        } => on_sync_response(channel_id, doc_id, transmission, ephemeral, ctx),
        Message::Update {
            doc_id,
            transmission,
        } => on_update(channel_id, doc_id, transmission, ctx),
        Message::DirectoryRequest { doc_ids } => {
            on_directory_request(channel_id, doc_ids.as_deref(), ctx)
        }
        Message::DirectoryResponse { doc_ids } => on_doc_listing(channel_id, doc_ids, false, ctx),
        Message::NewDoc { doc_ids } => on_doc_listing(channel_id, doc_ids, true, ctx),
        Message::DeleteRequest { doc_id } => on_delete_request(channel_id, doc_id, ctx),
        Message::DeleteResponse { doc_id, status } => {
            debug!(%doc_id, ?status, "peer answered delete request");
            Vec::new()
        }
        Message::Ephemeral(eph) => on_ephemeral(channel_id, eph, ctx),
        Message::Batch { messages } => {
            // Transport-level aggregation; dispatch each in order against
            // the same snapshot.
            Message::flatten(messages.clone())
                .iter()
                .flat_map(|m| handle_message(channel_id, m, ctx))
                .collect()
        }
    }
}

// ── Establishment ────────────────────────────────────────────────

fn on_establish_request(
    channel_id: ChannelId,
    identity: &PeerInfo,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };
    let is_reconnection = ctx.model.peers.contains_key(&identity.peer_id);

    let mut cmds = vec![
        Command::UpgradeChannel {
            channel_id,
            identity: identity.clone(),
        },
        Command::Send {
            channel_id,
            message: Message::EstablishResponse {
                identity: ctx.identity.clone(),
            },
        },
    ];

    // The acceptor applies the awareness rule strictly: request only for
    // documents the peer never knew or where we are strictly ahead.
    for doc_id in ctx.model.doc_ids() {
        let Some(state) = ctx.model.documents.get(&doc_id) else {
            continue;
        };
        if !ctx.allowed(channel, &doc_id, |p, c| p.can_begin_sync(c)) {
            continue;
        }
        let ours = ctx.doc_version(state);
        let decision = if is_reconnection {
            acceptor_reconnect_decision(ctx, &identity.peer_id, state, &doc_id, &ours)
        } else {
            SyncDecision::Request
        };
        push_sync_decision(&mut cmds, channel_id, identity, &doc_id, &ours, decision, channel.kind);
    }

    cmds
}

fn on_establish_response(
    channel_id: ChannelId,
    identity: &PeerInfo,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };
    let is_reconnection = ctx.model.peers.contains_key(&identity.peer_id);

    let mut cmds = vec![Command::UpgradeChannel {
        channel_id,
        identity: identity.clone(),
    }];

    if !is_reconnection {
        // New peer: learn what they have, offer everything we have.
        cmds.push(Command::Send {
            channel_id,
            message: Message::DirectoryRequest { doc_ids: None },
        });
    }

    for doc_id in ctx.model.doc_ids() {
        let Some(state) = ctx.model.documents.get(&doc_id) else {
            continue;
        };
        if !ctx.allowed(channel, &doc_id, |p, c| p.can_begin_sync(c)) {
            continue;
        }
        let ours = ctx.doc_version(state);
        let decision = if is_reconnection {
            // Reconnecting initiator: directory discovery is skipped and
            // every still-plausible doc gets a cheap bidirectional probe;
            // a peer that answered `unavailable` before is left alone.
            match peer_awareness(ctx, &identity.peer_id, &doc_id) {
                DocAwareness::NoDoc => SyncDecision::SkipAbsent,
                _ => SyncDecision::Request,
            }
        } else {
            SyncDecision::Request
        };
        push_sync_decision(&mut cmds, channel_id, identity, &doc_id, &ours, decision, channel.kind);
    }

    cmds
}

enum SyncDecision {
    /// Send a bidirectional sync request.
    Request,
    /// Converged as far as the cache knows; publish Synced without
    /// touching the wire.
    SkipSynced,
    /// Peer is known not to have the doc; publish Absent.
    SkipAbsent,
}

fn acceptor_reconnect_decision(
    ctx: &HandlerContext<'_>,
    peer_id: &PeerId,
    state: &DocState,
    doc_id: &DocId,
    ours: &VersionVector,
) -> SyncDecision {
    match peer_awareness(ctx, peer_id, doc_id) {
        DocAwareness::Unknown => SyncDecision::Request,
        DocAwareness::NoDoc => SyncDecision::SkipAbsent,
        DocAwareness::HasDoc(None) => SyncDecision::Request,
        DocAwareness::HasDoc(Some(theirs)) => {
            let doc = state.doc.lock().expect("doc handle poisoned");
            match doc.compare(ours, &theirs) {
                Ok(CausalOrder::After) | Ok(CausalOrder::Concurrent) => SyncDecision::Request,
                Ok(_) => SyncDecision::SkipSynced,
                Err(e) => {
                    warn!(%doc_id, error = %e, "version comparison failed; requesting sync");
                    SyncDecision::Request
                }
            }
        }
    }
}

fn peer_awareness(ctx: &HandlerContext<'_>, peer_id: &PeerId, doc_id: &DocId) -> DocAwareness {
    ctx.model
        .peers
        .get(peer_id)
        .map(|p| p.awareness_of(doc_id).clone())
        .unwrap_or_default()
}

fn push_sync_decision(
    cmds: &mut Vec<Command>,
    channel_id: ChannelId,
    identity: &PeerInfo,
    doc_id: &DocId,
    ours: &VersionVector,
    decision: SyncDecision,
    kind: ChannelKind,
) {
    let ready = match decision {
        SyncDecision::Request => {
            cmds.push(Command::Send {
                channel_id,
                message: Message::sync_request(doc_id.clone(), ours.clone(), true),
            });
            ReadyState::Syncing
        }
        SyncDecision::SkipSynced => ReadyState::Synced,
        SyncDecision::SkipAbsent => ReadyState::Absent,
    };
    cmds.push(Command::SetReady {
        doc_id: doc_id.clone(),
        peer_id: identity.peer_id.clone(),
        kind,
        state: ready,
    });
}

// ── Sync exchange ────────────────────────────────────────────────

fn on_sync_request(
    channel_id: ChannelId,
    doc_id: &DocId,
    requester_version: &VersionVector,
    bidirectional: bool,
    ephemeral: &[EphemeralEntry],
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };
    let Some(peer_id) = channel.peer_id().cloned() else {
        warn!(%channel_id, "sync request on unestablished channel; dropping");
        return Vec::new();
    };

    let mut cmds = Vec::new();

    match ctx.model.documents.get(doc_id) {
        Some(state) => {
            if !ctx.allowed(channel, doc_id, |p, c| p.can_reveal(c)) {
                // Denial is indistinguishable from absence on the wire.
                cmds.push(Command::Send {
                    channel_id,
                    message: Message::sync_response(doc_id.clone(), Transmission::Unavailable),
                });
                apply_piggyback(&mut cmds, doc_id, ephemeral);
                return cmds;
            }

            cmds.push(Command::SubscribeChannel {
                doc_id: doc_id.clone(),
                channel_id,
            });

            let ours = ctx.doc_version(state);
            let (transmission, requester_may_be_ahead) =
                respond_transmission(state, &ours, requester_version, doc_id);

            // Cache what the peer will know after this exchange: our
            // version once the data transmission lands, otherwise
            // whatever they declared.
            let awareness = if transmission.has_data() {
                DocAwareness::HasDoc(Some(ours.clone()))
            } else if requester_version.is_empty() {
                DocAwareness::HasDoc(None)
            } else {
                DocAwareness::HasDoc(Some(requester_version.clone()))
            };
            cmds.push(Command::SetAwareness {
                peer_id: peer_id.clone(),
                doc_id: doc_id.clone(),
                awareness,
            });

            cmds.push(Command::Send {
                channel_id,
                message: Message::SyncResponse {
                    doc_id: doc_id.clone(),
                    transmission,
                    ephemeral: state.ephemeral.entries_of(&ctx.identity.peer_id),
                },
            });
            apply_piggyback(&mut cmds, doc_id, ephemeral);

            cmds.push(Command::SetReady {
                doc_id: doc_id.clone(),
                peer_id: peer_id.clone(),
                kind: channel.kind,
                state: ReadyState::Synced,
            });

            // The follow-up request exists to pull what the requester
            // has and we lack; when their declared version proves there
            // is nothing to pull, the round trip ends here.
            if bidirectional && requester_may_be_ahead {
                cmds.push(Command::Send {
                    channel_id,
                    message: Message::sync_request(doc_id.clone(), ours, false),
                });
                cmds.push(Command::SetReady {
                    doc_id: doc_id.clone(),
                    peer_id,
                    kind: channel.kind,
                    state: ReadyState::Syncing,
                });
            }
        }
        None => {
            // A requester that actually holds state may create the doc
            // here (rules permitting); an empty-handed request for an
            // unknown doc is answered as absent.
            let may_create = !requester_version.is_empty()
                && ctx.allowed(channel, doc_id, |p, c| p.can_create(c));
            if may_create {
                cmds.push(Command::EnsureDoc {
                    doc_id: doc_id.clone(),
                    doc: None,
                });
                cmds.push(Command::SubscribeChannel {
                    doc_id: doc_id.clone(),
                    channel_id,
                });
                cmds.push(Command::SetAwareness {
                    peer_id: peer_id.clone(),
                    doc_id: doc_id.clone(),
                    awareness: DocAwareness::HasDoc(Some(requester_version.clone())),
                });
                // Freshly created and empty: we are trivially behind.
                cmds.push(Command::Send {
                    channel_id,
                    message: Message::sync_response(
                        doc_id.clone(),
                        Transmission::UpToDate {
                            version: VersionVector::default(),
                        },
                    ),
                });
                apply_piggyback(&mut cmds, doc_id, ephemeral);
                cmds.push(Command::SetReady {
                    doc_id: doc_id.clone(),
                    peer_id: peer_id.clone(),
                    kind: channel.kind,
                    state: ReadyState::Synced,
                });
                if bidirectional {
                    cmds.push(Command::Send {
                        channel_id,
                        message: Message::sync_request(
                            doc_id.clone(),
                            VersionVector::default(),
                            false,
                        ),
                    });
                    cmds.push(Command::SetReady {
                        doc_id: doc_id.clone(),
                        peer_id,
                        kind: channel.kind,
                        state: ReadyState::Syncing,
                    });
                }
            } else {
                cmds.push(Command::Send {
                    channel_id,
                    message: Message::sync_response(doc_id.clone(), Transmission::Unavailable),
                });
            }
        }
    }

    cmds
}

/// Chooses the transmission for a sync request and reports whether the
/// requester's declared version leaves anything for us to pull back.
fn respond_transmission(
    state: &DocState,
    ours: &VersionVector,
    theirs: &VersionVector,
    doc_id: &DocId,
) -> (Transmission, bool) {
    let doc = state.doc.lock().expect("doc handle poisoned");

    if theirs.is_empty() {
        // An empty-handed requester gets the full state and has nothing
        // we could pull.
        let tx = match doc.export(ExportMode::Snapshot) {
            Ok(data) => Transmission::Snapshot {
                data,
                version: ours.clone(),
            },
            Err(e) => {
                warn!(%doc_id, error = %e, "snapshot export failed");
                Transmission::Unavailable
            }
        };
        return (tx, false);
    }

    match doc.compare(ours, theirs) {
        Ok(order @ (CausalOrder::After | CausalOrder::Concurrent)) => {
            let tx = match doc.export(ExportMode::UpdatesSince(theirs.clone())) {
                Ok(data) => Transmission::Update {
                    data,
                    version: ours.clone(),
                },
                Err(e) => {
                    warn!(%doc_id, error = %e, "delta export failed");
                    Transmission::Unavailable
                }
            };
            (tx, order == CausalOrder::Concurrent)
        }
        Ok(CausalOrder::Equal) => (
            Transmission::UpToDate {
                version: ours.clone(),
            },
            false,
        ),
        Ok(CausalOrder::Before) => (
            Transmission::UpToDate {
                version: ours.clone(),
            },
            true,
        ),
        Err(e) => {
            warn!(%doc_id, error = %e, "version comparison failed; sending snapshot");
            let tx = match doc.export(ExportMode::Snapshot) {
                Ok(data) => Transmission::Snapshot {
                    data,
                    version: ours.clone(),
                },
                Err(e) => {
                    warn!(%doc_id, error = %e, "snapshot export failed");
                    Transmission::Unavailable
                }
            };
            (tx, true)
        }
    }
}

fn apply_piggyback(cmds: &mut Vec<Command>, doc_id: &DocId, ephemeral: &[EphemeralEntry]) {
    if !ephemeral.is_empty() {
        // Delivered exactly as a standalone ephemeral message with no
        // hop budget: applied locally, never forwarded.
        cmds.push(Command::ApplyEphemeral {
            doc_id: doc_id.clone(),
            entries: ephemeral.to_vec(),
        });
    }
}

fn on_sync_response(
    channel_id: ChannelId,
    doc_id: &DocId,
    transmission: &Transmission,
    ephemeral: &[EphemeralEntry],
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };
    let Some(peer_id) = channel.peer_id().cloned() else {
        warn!(%channel_id, "sync response on unestablished channel; dropping");
        return Vec::new();
    };

    let mut cmds = Vec::new();
    if ctx.model.documents.contains_key(doc_id) {
        apply_piggyback(&mut cmds, doc_id, ephemeral);
    }

    match transmission {
        Transmission::UpToDate { version } => {
            cmds.push(Command::SubscribeChannel {
                doc_id: doc_id.clone(),
                channel_id,
            });
            cmds.push(Command::SetAwareness {
                peer_id: peer_id.clone(),
                doc_id: doc_id.clone(),
                awareness: DocAwareness::HasDoc(Some(version.clone())),
            });
            cmds.push(Command::SetReady {
                doc_id: doc_id.clone(),
                peer_id,
                kind: channel.kind,
                state: ReadyState::Synced,
            });
        }
        Transmission::Snapshot { data, version } | Transmission::Update { data, version } => {
            if !ctx.allowed(channel, doc_id, |p, c| p.can_update(c)) {
                debug!(%doc_id, "update rule denied incoming transmission");
                return cmds;
            }
            cmds.push(Command::SubscribeChannel {
                doc_id: doc_id.clone(),
                channel_id,
            });
            cmds.push(Command::ImportDoc {
                doc_id: doc_id.clone(),
                data: data.clone(),
                remote_version: version.clone(),
                source: channel_id,
            });
            cmds.push(Command::SetAwareness {
                peer_id: peer_id.clone(),
                doc_id: doc_id.clone(),
                awareness: DocAwareness::HasDoc(Some(version.clone())),
            });
            cmds.push(Command::SetReady {
                doc_id: doc_id.clone(),
                peer_id,
                kind: channel.kind,
                state: ReadyState::Synced,
            });
        }
        Transmission::Unavailable => {
            cmds.push(Command::SetAwareness {
                peer_id: peer_id.clone(),
                doc_id: doc_id.clone(),
                awareness: DocAwareness::NoDoc,
            });
            cmds.push(Command::SetReady {
                doc_id: doc_id.clone(),
                peer_id,
                kind: channel.kind,
                state: ReadyState::Absent,
            });
        }
    }

    cmds
}

fn on_update(
    channel_id: ChannelId,
    doc_id: &DocId,
    transmission: &Transmission,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };
    let Some(peer_id) = channel.peer_id().cloned() else {
        return Vec::new();
    };

    let (data, version) = match transmission {
        Transmission::Snapshot { data, version } | Transmission::Update { data, version } => {
            (data, version)
        }
        // `up-to-date` and `unavailable` carry nothing to apply.
        _ => return Vec::new(),
    };

    if !ctx.allowed(channel, doc_id, |p, c| p.can_update(c)) {
        debug!(%doc_id, "update rule denied unsolicited push");
        return Vec::new();
    }

    let mut cmds = Vec::new();
    if !ctx.model.documents.contains_key(doc_id) {
        if version.is_empty() || !ctx.allowed(channel, doc_id, |p, c| p.can_create(c)) {
            debug!(%doc_id, "dropping push for unknown document");
            return Vec::new();
        }
        cmds.push(Command::EnsureDoc {
            doc_id: doc_id.clone(),
            doc: None,
        });
    }

    cmds.push(Command::SubscribeChannel {
        doc_id: doc_id.clone(),
        channel_id,
    });
    cmds.push(Command::ImportDoc {
        doc_id: doc_id.clone(),
        data: data.clone(),
        remote_version: version.clone(),
        source: channel_id,
    });
    cmds.push(Command::SetAwareness {
        peer_id: peer_id.clone(),
        doc_id: doc_id.clone(),
        awareness: DocAwareness::HasDoc(Some(version.clone())),
    });
    cmds.push(Command::SetReady {
        doc_id: doc_id.clone(),
        peer_id,
        kind: channel.kind,
        state: ReadyState::Synced,
    });
    cmds
}

// ── Discovery ────────────────────────────────────────────────────

fn on_directory_request(
    channel_id: ChannelId,
    filter: Option<&[DocId]>,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };
    if channel.peer_id().is_none() {
        warn!(%channel_id, "directory request on unestablished channel; dropping");
        return Vec::new();
    }

    let candidates: Vec<DocId> = match filter {
        Some(ids) => ids
            .iter()
            .filter(|id| ctx.model.documents.contains_key(*id))
            .cloned()
            .collect(),
        None => ctx.model.doc_ids(),
    };

    let doc_ids: Vec<DocId> = candidates
        .into_iter()
        .filter(|id| ctx.allowed(channel, id, |p, c| p.can_reveal(c)))
        .collect();

    vec![Command::Send {
        channel_id,
        message: Message::DirectoryResponse { doc_ids },
    }]
}

fn on_doc_listing(
    channel_id: ChannelId,
    doc_ids: &[DocId],
    probe_known: bool,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };
    let Some(peer_id) = channel.peer_id().cloned() else {
        return Vec::new();
    };

    let mut cmds = Vec::new();
    for doc_id in doc_ids {
        cmds.push(Command::SetAwareness {
            peer_id: peer_id.clone(),
            doc_id: doc_id.clone(),
            awareness: DocAwareness::HasDoc(None),
        });
        if let Some(state) = ctx.model.documents.get(doc_id) {
            cmds.push(Command::SubscribeChannel {
                doc_id: doc_id.clone(),
                channel_id,
            });
            // A new-doc announcement for a doc we also hold may mean the
            // announcer has content we lack; probe it. Duplicate
            // announcements are no-ops by idempotence of the request.
            if probe_known && ctx.allowed(channel, doc_id, |p, c| p.can_begin_sync(c)) {
                let ours = ctx.doc_version(state);
                cmds.push(Command::Send {
                    channel_id,
                    message: Message::sync_request(doc_id.clone(), ours, true),
                });
                cmds.push(Command::SetReady {
                    doc_id: doc_id.clone(),
                    peer_id: peer_id.clone(),
                    kind: channel.kind,
                    state: ReadyState::Syncing,
                });
            }
        }
    }
    cmds
}

// ── Deletion ─────────────────────────────────────────────────────

fn on_delete_request(
    channel_id: ChannelId,
    doc_id: &DocId,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };
    if channel.peer_id().is_none() {
        return Vec::new();
    }

    let allowed = ctx.model.documents.contains_key(doc_id)
        && ctx.allowed(channel, doc_id, |p, c| p.can_delete(c));

    if allowed {
        vec![
            Command::DeleteDocLocal {
                doc_id: doc_id.clone(),
            },
            Command::Send {
                channel_id,
                message: Message::DeleteResponse {
                    doc_id: doc_id.clone(),
                    status: DeleteStatus::Deleted,
                },
            },
        ]
    } else {
        // Unknown document and rule denial answer identically.
        vec![Command::Send {
            channel_id,
            message: Message::DeleteResponse {
                doc_id: doc_id.clone(),
                status: DeleteStatus::Ignored,
            },
        }]
    }
}

fn on_delete_doc(doc_id: &DocId, ctx: &HandlerContext<'_>) -> Vec<Command> {
    let mut cmds: Vec<Command> = ctx
        .model
        .subscribed_channels(doc_id, None)
        .into_iter()
        .map(|channel_id| Command::Send {
            channel_id,
            message: Message::DeleteRequest {
                doc_id: doc_id.clone(),
            },
        })
        .collect();
    cmds.push(Command::DeleteDocLocal {
        doc_id: doc_id.clone(),
    });
    cmds
}

// ── Ephemeral relay ──────────────────────────────────────────────

fn on_ephemeral(
    channel_id: ChannelId,
    message: &EphemeralMessage,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    if !ctx.model.documents.contains_key(&message.doc_id) {
        debug!(doc_id = %message.doc_id, "presence for unknown document; dropping");
        return Vec::new();
    }

    let mut cmds = vec![Command::ApplyEphemeral {
        doc_id: message.doc_id.clone(),
        entries: message.stores.clone(),
    }];

    if message.hops_remaining > 0 {
        // Forward the original stores verbatim so the author's identity
        // survives the relay; only the hop budget shrinks.
        let forwarded = Message::Ephemeral(EphemeralMessage {
            doc_id: message.doc_id.clone(),
            hops_remaining: message.hops_remaining - 1,
            stores: message.stores.clone(),
        });
        for target in ctx
            .model
            .subscribed_channels(&message.doc_id, Some(channel_id))
        {
            cmds.push(Command::Send {
                channel_id: target,
                message: forwarded.clone(),
            });
        }
    }

    cmds
}

fn on_local_ephemeral(
    doc_id: &DocId,
    namespace: &str,
    data: &[u8],
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    if !ctx.model.documents.contains_key(doc_id) {
        debug!(%doc_id, "local presence for unregistered document; dropping");
        return Vec::new();
    }

    let entry = EphemeralEntry {
        peer_id: ctx.identity.peer_id.clone(),
        namespace: namespace.to_string(),
        data: data.to_vec(),
    };

    let mut cmds = vec![Command::ApplyEphemeral {
        doc_id: doc_id.clone(),
        entries: vec![entry.clone()],
    }];

    let broadcast = Message::Ephemeral(EphemeralMessage {
        doc_id: doc_id.clone(),
        hops_remaining: ctx.config.ephemeral_hops,
        stores: vec![entry],
    });
    for target in ctx.model.subscribed_channels(doc_id, None) {
        cmds.push(Command::Send {
            channel_id: target,
            message: broadcast.clone(),
        });
    }

    cmds
}

fn on_heartbeat(ctx: &HandlerContext<'_>) -> Vec<Command> {
    let mut cmds = Vec::new();
    for doc_id in ctx.model.doc_ids() {
        let Some(state) = ctx.model.documents.get(&doc_id) else {
            continue;
        };
        let entries = state.ephemeral.entries_of(&ctx.identity.peer_id);
        if entries.is_empty() {
            continue;
        }
        let broadcast = Message::Ephemeral(EphemeralMessage {
            doc_id: doc_id.clone(),
            hops_remaining: ctx.config.ephemeral_hops,
            stores: entries,
        });
        for target in ctx.model.subscribed_channels(&doc_id, None) {
            cmds.push(Command::Send {
                channel_id: target,
                message: broadcast.clone(),
            });
        }
    }
    cmds
}

// ── Documents and channels ───────────────────────────────────────

fn on_doc_registered(
    doc_id: &DocId,
    doc: &crate::model::SharedDoc,
    ephemeral: &crate::ephemeral::EphemeralDocStore,
    ctx: &HandlerContext<'_>,
) -> Vec<Command> {
    if ctx.model.documents.contains_key(doc_id) {
        // Repeated facade get; nothing new to do.
        return Vec::new();
    }

    let mut cmds = vec![Command::EnsureDoc {
        doc_id: doc_id.clone(),
        doc: Some((doc.clone(), ephemeral.clone())),
    }];

    let ours = doc.lock().expect("doc handle poisoned").version();

    for channel_id in ctx.model.established_channels() {
        let Some(channel) = ctx.model.channel(channel_id) else {
            continue;
        };
        let Some(peer_id) = channel.peer_id().cloned() else {
            continue;
        };
        if ctx.allowed(channel, doc_id, |p, c| p.can_reveal(c)) {
            cmds.push(Command::Send {
                channel_id,
                message: Message::NewDoc {
                    doc_ids: vec![doc_id.clone()],
                },
            });
        }
        if ctx.allowed(channel, doc_id, |p, c| p.can_begin_sync(c)) {
            cmds.push(Command::SubscribeChannel {
                doc_id: doc_id.clone(),
                channel_id,
            });
            cmds.push(Command::Send {
                channel_id,
                message: Message::sync_request(doc_id.clone(), ours.clone(), true),
            });
            cmds.push(Command::SetReady {
                doc_id: doc_id.clone(),
                peer_id,
                kind: channel.kind,
                state: ReadyState::Syncing,
            });
        }
    }

    cmds
}

fn on_local_doc_changed(doc_id: &DocId, ctx: &HandlerContext<'_>) -> Vec<Command> {
    let Some(state) = ctx.model.documents.get(doc_id) else {
        return Vec::new();
    };
    let ours = ctx.doc_version(state);

    let mut cmds = Vec::new();
    for channel_id in ctx.model.subscribed_channels(doc_id, None) {
        let Some(channel) = ctx.model.channel(channel_id) else {
            continue;
        };
        let Some(peer_id) = channel.peer_id() else {
            continue;
        };
        // Export a delta tailored to what the peer last proved it had;
        // an unknown baseline degrades to a full export.
        let baseline = match peer_awareness(ctx, peer_id, doc_id) {
            DocAwareness::HasDoc(Some(theirs)) => theirs,
            _ => VersionVector::default(),
        };
        let doc = state.doc.lock().expect("doc handle poisoned");
        let export = if baseline.is_empty() {
            doc.export(ExportMode::Snapshot).map(|data| Transmission::Snapshot {
                data,
                version: ours.clone(),
            })
        } else {
            doc.export(ExportMode::UpdatesSince(baseline))
                .map(|data| Transmission::Update {
                    data,
                    version: ours.clone(),
                })
        };
        drop(doc);
        match export {
            Ok(transmission) => cmds.push(Command::Send {
                channel_id,
                message: Message::Update {
                    doc_id: doc_id.clone(),
                    transmission,
                },
            }),
            Err(e) => warn!(%doc_id, error = %e, "export for update push failed"),
        }
    }
    cmds
}

fn on_channel_removed(channel_id: ChannelId, ctx: &HandlerContext<'_>) -> Vec<Command> {
    let Some(channel) = ctx.model.channel(channel_id) else {
        return Vec::new();
    };

    let mut cmds = Vec::new();

    if let ChannelState::Established(peer_id) = &channel.state {
        if let Some(peer) = ctx.model.peers.get(peer_id) {
            let mut affected: Vec<DocId> = peer
                .subscriptions
                .iter()
                .filter(|d| ctx.model.documents.contains_key(*d))
                .cloned()
                .collect();
            affected.sort();
            for doc_id in affected {
                cmds.push(Command::SetReady {
                    doc_id,
                    peer_id: peer_id.clone(),
                    kind: channel.kind,
                    state: ReadyState::Disconnected,
                });
            }

            let last_channel =
                peer.channels.len() == 1 && peer.channels.contains(&channel_id);
            cmds.push(Command::RemoveChannel { channel_id });
            if last_channel {
                cmds.push(Command::RemoveEphemeralPeer {
                    peer_id: peer_id.clone(),
                });
            }
            return cmds;
        }
    }

    cmds.push(Command::RemoveChannel { channel_id });
    cmds
}
