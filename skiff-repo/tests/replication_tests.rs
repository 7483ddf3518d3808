//! End-to-end replication tests over in-process bridges.
//!
//! Two or three repos, each with its own synchronizer task, joined by
//! `BridgeAdapter` pairs and replicating `MockDoc` engines.

use async_trait::async_trait;
use skiff_crdt::{CausalOrder, CrdtDoc, MockDoc};
use skiff_repo::{sync, Repo, WaitOptions};
use skiff_sync::{
    AdapterHost, BridgeAdapter, ReadyState, RuleContext, SendDecision, SendEnvelope,
    SendInterceptor, SharePolicy, SyncConfig, SyncError,
};
use skiff_types::{ChannelId, ChannelKind, DocId, PeerId, PeerInfo};
use skiff_wire::Message;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn make_repo(name: &str) -> Repo {
    make_repo_with(name, SyncConfig::default(), Arc::new(skiff_sync::AllowAll))
}

fn make_repo_with(name: &str, config: SyncConfig, policy: Arc<dyn SharePolicy>) -> Repo {
    let identity = PeerInfo::new(PeerId::new(name), name, "user");
    let writer = identity.peer_id.to_string();
    Repo::with_policy(
        identity,
        config,
        Arc::new(move |_doc_id: &DocId| Box::new(MockDoc::new(writer.clone())) as Box<dyn CrdtDoc>),
        policy,
    )
}

struct Link {
    host_a: Arc<AdapterHost>,
    ch_a: ChannelId,
    host_b: Arc<AdapterHost>,
    ch_b: ChannelId,
}

/// Joins two repos with a bridge; `a` initiates establishment.
fn connect(a: &Repo, b: &Repo) -> Link {
    connect_with(a, b, None, Vec::new(), Vec::new())
}

fn connect_with(
    a: &Repo,
    b: &Repo,
    payload_limit: Option<usize>,
    interceptors_a: Vec<Arc<dyn SendInterceptor>>,
    interceptors_b: Vec<Arc<dyn SendInterceptor>>,
) -> Link {
    let (bridge_a, bridge_b) = BridgeAdapter::pair_with(ChannelKind::Network, payload_limit);
    let host_a = a.add_adapter_with_interceptors(Arc::new(bridge_a), interceptors_a);
    let host_b = b.add_adapter_with_interceptors(Arc::new(bridge_b), interceptors_b);
    let ch_a = host_a.add_channel();
    let ch_b = host_b.add_channel();
    host_a.establish_channel(ch_a);
    Link {
        host_a,
        ch_a,
        host_b,
        ch_b,
    }
}

fn disconnect(link: &Link) {
    link.host_a.remove_channel(link.ch_a);
    link.host_b.remove_channel(link.ch_b);
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for: {what}");
}

fn text_of(handle: &skiff_repo::DocHandle) -> String {
    handle.with_doc(|doc| {
        // Engines in these tests are always MockDoc; re-export and read
        // through a scratch replica to stay behind the trait.
        let mut scratch = MockDoc::new("scratch");
        scratch
            .import(&doc.export(skiff_crdt::ExportMode::Snapshot).unwrap())
            .unwrap();
        scratch.text()
    })
}

/// Records every message leaving through the adapter it is attached to.
#[derive(Clone)]
struct Recorder(Arc<Mutex<Vec<Message>>>);

impl Recorder {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    fn messages(&self) -> Vec<Message> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl SendInterceptor for Recorder {
    async fn intercept(&self, envelope: &SendEnvelope) -> SendDecision {
        self.0
            .lock()
            .unwrap()
            .extend(envelope.messages.iter().cloned());
        SendDecision::Forward
    }
}

/// Drops any envelope carrying a sync request — simulated packet loss.
struct DropSyncRequests;

#[async_trait]
impl SendInterceptor for DropSyncRequests {
    async fn intercept(&self, envelope: &SendEnvelope) -> SendDecision {
        let carries_request = envelope
            .messages
            .iter()
            .any(|m| matches!(m, Message::SyncRequest { .. }));
        if carries_request {
            SendDecision::Drop
        } else {
            SendDecision::Forward
        }
    }
}

struct DenyReveal {
    doc: DocId,
}

impl SharePolicy for DenyReveal {
    fn can_reveal(&self, ctx: &RuleContext<'_>) -> bool {
        *ctx.doc_id != self.doc
    }
}

// ── Scenario: two-peer convergence ───────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn two_peer_convergence() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");

    let doc_a = a.get("d1".into());
    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &["a", "b", "c"])).unwrap());

    let doc_b = b.get("d1".into());
    connect(&a, &b);

    sync(&doc_b)
        .wait_for_sync(WaitOptions {
            kind: Some(ChannelKind::Network),
            ..Default::default()
        })
        .await
        .unwrap();

    eventually("B converges to abc", || text_of(&doc_b) == "abc").await;
    assert_eq!(doc_b.op_count(), 3);

    let states = sync(&doc_b).ready_states();
    assert!(states
        .iter()
        .any(|(peer, state)| *peer == a.identity().peer_id && *state == ReadyState::Synced));
}

// ── Scenario: absent document ────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn absent_document_resolves_and_stays_empty() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");
    connect(&a, &b);

    let doc_b = b.get("d2".into());
    sync(&doc_b)
        .wait_for_sync(WaitOptions::default())
        .await
        .unwrap();

    let states = sync(&doc_b).ready_states();
    assert!(states
        .iter()
        .any(|(peer, state)| *peer == a.identity().peer_id && *state == ReadyState::Absent));
    assert_eq!(doc_b.op_count(), 0);
}

// ── Scenario: reconnection with no changes ───────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn reconnection_exchanges_no_document_bytes() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");

    let doc_a = a.get("d1".into());
    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &["abc"])).unwrap());
    let doc_b = b.get("d1".into());

    let link = connect(&a, &b);
    eventually("first convergence", || text_of(&doc_b) == "abc").await;
    eventually("both synced", || {
        let a_done = sync(&doc_a)
            .ready_states()
            .iter()
            .any(|(_, s)| *s == ReadyState::Synced);
        let b_done = sync(&doc_b)
            .ready_states()
            .iter()
            .any(|(_, s)| *s == ReadyState::Synced);
        a_done && b_done
    })
    .await;

    disconnect(&link);
    eventually("both disconnected", || {
        sync(&doc_b)
            .ready_states()
            .iter()
            .any(|(_, s)| *s == ReadyState::Disconnected)
    })
    .await;

    // Reconnect with recorders; B initiates this time.
    let recorder_a = Recorder::new();
    let recorder_b = Recorder::new();
    let (bridge_b, bridge_a) = BridgeAdapter::pair();
    let host_b = b.add_adapter_with_interceptors(
        Arc::new(bridge_b),
        vec![Arc::new(recorder_b.clone())],
    );
    let host_a = a.add_adapter_with_interceptors(
        Arc::new(bridge_a),
        vec![Arc::new(recorder_a.clone())],
    );
    let ch_b = host_b.add_channel();
    let _ch_a = host_a.add_channel();
    host_b.establish_channel(ch_b);

    eventually("resynced after reconnect", || {
        sync(&doc_b)
            .ready_states()
            .iter()
            .any(|(peer, s)| *peer == a.identity().peer_id && *s == ReadyState::Synced)
    })
    .await;

    let exchanged: Vec<Message> = recorder_a
        .messages()
        .into_iter()
        .chain(recorder_b.messages())
        .collect();

    // Directory discovery is skipped entirely on reconnection.
    assert!(!exchanged
        .iter()
        .any(|m| matches!(m, Message::DirectoryRequest { .. })));

    // Exactly one probe, flagged bidirectional.
    let requests: Vec<&Message> = exchanged
        .iter()
        .filter(|m| matches!(m, Message::SyncRequest { .. }))
        .collect();
    assert_eq!(requests.len(), 1);
    assert!(matches!(
        requests[0],
        Message::SyncRequest {
            bidirectional: true,
            ..
        }
    ));

    // Zero document bytes crossed the wire.
    for message in &exchanged {
        match message {
            Message::SyncResponse { transmission, .. } | Message::Update { transmission, .. } => {
                assert!(
                    !transmission.has_data(),
                    "unexpected data transmission: {message:?}"
                );
            }
            _ => {}
        }
    }
}

// ── Scenario: fragmented snapshot ────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn large_snapshot_survives_fragmentation() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");

    let payload = "x".repeat(250 * 1024);
    let doc_a = a.get("big".into());
    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &[&payload])).unwrap());
    let doc_b = b.get("big".into());

    connect_with(&a, &b, Some(100 * 1024), Vec::new(), Vec::new());

    sync(&doc_b)
        .wait_for_sync(WaitOptions::default())
        .await
        .unwrap();
    eventually("B holds the full payload", || {
        text_of(&doc_b).len() == payload.len()
    })
    .await;

    let version_a = doc_a.version();
    let version_b = doc_b.version();
    doc_a.with_doc(|doc| {
        assert_eq!(doc.compare(&version_a, &version_b).unwrap(), CausalOrder::Equal);
    });
}

// ── Scenario: ephemeral relay across a hop ───────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn presence_relays_across_intermediate_peer() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");
    let c = make_repo("peer-c");

    let doc_a = a.get("d".into());
    let doc_b = b.get("d".into());
    let doc_c = c.get("d".into());

    let link_ab = connect(&a, &b);
    let _link_bc = connect(&b, &c);

    for doc in [&doc_a, &doc_b, &doc_c] {
        sync(doc).wait_for_sync(WaitOptions::default()).await.unwrap();
    }

    sync(&doc_a).presence("presence").set_self(b"on".to_vec());

    let a_id = a.identity().peer_id.clone();
    let presence_c = sync(&doc_c).presence("presence");
    eventually("C sees A's presence", || {
        presence_c.get(&a_id) == Some(b"on".to_vec())
    })
    .await;
    assert!(presence_c.peers().iter().any(|(peer, _)| *peer == a_id));

    // A drops off; B must broadcast the deletion so C forgets A.
    disconnect(&link_ab);
    eventually("C forgets A", || presence_c.get(&a_id).is_none()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_hop_presence_does_not_cross_the_relay() {
    let config = SyncConfig {
        ephemeral_hops: 0,
        ..SyncConfig::default()
    };
    let a = make_repo_with("peer-a", config, Arc::new(skiff_sync::AllowAll));
    let b = make_repo("peer-b");
    let c = make_repo("peer-c");

    let doc_a = a.get("d".into());
    let doc_b = b.get("d".into());
    let doc_c = c.get("d".into());

    connect(&a, &b);
    connect(&b, &c);
    for doc in [&doc_a, &doc_b, &doc_c] {
        sync(doc).wait_for_sync(WaitOptions::default()).await.unwrap();
    }

    sync(&doc_a).presence("presence").set_self(b"on".to_vec());

    let a_id = a.identity().peer_id.clone();
    let presence_b = sync(&doc_b).presence("presence");
    eventually("B sees A directly", || presence_b.get(&a_id).is_some()).await;

    // Give the relay ample opportunity, then confirm silence at C.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sync(&doc_c).presence("presence").get(&a_id), None);
}

// ── Scenario: permission denial is indistinguishable ─────────────

#[tokio::test(flavor = "multi_thread")]
async fn reveal_denial_looks_like_absence() {
    let a = make_repo_with(
        "peer-a",
        SyncConfig::default(),
        Arc::new(DenyReveal {
            doc: DocId::new("secret"),
        }),
    );
    let b = make_repo("peer-b");

    let doc_a = a.get("secret".into());
    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &["classified"])).unwrap());

    connect(&a, &b);

    let doc_b = b.get("secret".into());
    sync(&doc_b)
        .wait_for_sync(WaitOptions::default())
        .await
        .unwrap();

    let states = sync(&doc_b).ready_states();
    assert!(states
        .iter()
        .any(|(peer, state)| *peer == a.identity().peer_id && *state == ReadyState::Absent));
    assert_eq!(doc_b.op_count(), 0);
}

// ── Live updates and deletion ────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn local_edits_push_to_subscribed_peers() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");

    let doc_a = a.get("d1".into());
    let doc_b = b.get("d1".into());
    connect(&a, &b);
    sync(&doc_b)
        .wait_for_sync(WaitOptions::default())
        .await
        .unwrap();

    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &["live"])).unwrap());
    doc_a.notify_changed();

    eventually("B receives the push", || text_of(&doc_b) == "live").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_propagates_to_peers() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");

    let doc_a = a.get("doomed".into());
    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &["bye"])).unwrap());
    let doc_b = b.get("doomed".into());

    connect(&a, &b);
    eventually("B converged first", || text_of(&doc_b) == "bye").await;

    a.delete(&DocId::new("doomed"));

    eventually("B dropped the doc", || {
        b.handle().registry.get(&DocId::new("doomed")).is_none()
    })
    .await;
}

// ── wait_for_sync outcomes ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn wait_without_adapters_fails_fast() {
    let a = make_repo("peer-a");
    let doc = a.get("d".into());
    let err = sync(&doc)
        .wait_for_sync(WaitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoAdapters { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_times_out_with_diagnostics() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");
    let doc_a = a.get("d".into());
    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &["x"])).unwrap());

    // A's sync requests evaporate in flight; establishment still works.
    connect_with(&a, &b, None, vec![Arc::new(DropSyncRequests)], Vec::new());

    let err = sync(&doc_a)
        .wait_for_sync(WaitOptions {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        })
        .await
        .unwrap_err();

    match err {
        SyncError::SyncTimeout { doc_id, ready, .. } => {
            assert_eq!(doc_id, DocId::new("d"));
            assert!(ready
                .iter()
                .any(|(peer, state)| *peer == b.identity().peer_id
                    && *state == ReadyState::Syncing));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_aborts_on_cancellation() {
    let a = make_repo("peer-a");
    let b = make_repo("peer-b");
    let doc_a = a.get("d".into());
    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &["x"])).unwrap());
    connect_with(&a, &b, None, vec![Arc::new(DropSyncRequests)], Vec::new());

    let token = tokio_util::sync::CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = sync(&doc_a)
        .wait_for_sync(WaitOptions {
            cancel: Some(token),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Aborted { .. }));
}

// ── Scheduling ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn quiescence_hook_fires_after_batches() {
    let a = make_repo("peer-a");
    let fired = Arc::new(Mutex::new(0usize));
    let sink = fired.clone();
    a.handle().on_quiescent(move || *sink.lock().unwrap() += 1);

    let _doc = a.get("d".into());
    eventually("quiescence observed", || *fired.lock().unwrap() > 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn delayed_sends_still_converge() {
    struct Slow;
    #[async_trait]
    impl SendInterceptor for Slow {
        async fn intercept(&self, _envelope: &SendEnvelope) -> SendDecision {
            SendDecision::Delay(Duration::from_millis(20))
        }
    }

    let a = make_repo("peer-a");
    let b = make_repo("peer-b");
    let doc_a = a.get("d1".into());
    doc_a.with_doc_mut(|doc| doc.import(&seed_ops("peer-a", &["slow"])).unwrap());
    let doc_b = b.get("d1".into());

    connect_with(&a, &b, None, vec![Arc::new(Slow)], vec![Arc::new(Slow)]);

    sync(&doc_b)
        .wait_for_sync(WaitOptions::default())
        .await
        .unwrap();
    eventually("converged through delays", || text_of(&doc_b) == "slow").await;
}

/// Snapshot bytes for a fresh doc holding the given text pieces.
fn seed_ops(writer: &str, pieces: &[&str]) -> Vec<u8> {
    let mut doc = MockDoc::new(writer);
    for piece in pieces {
        doc.insert_text(piece);
    }
    doc.export(skiff_crdt::ExportMode::Snapshot).unwrap()
}
