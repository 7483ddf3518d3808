//! Ephemeral store tests: apply/delete semantics, TTL sweep, peer
//! eviction, subscriptions.

use pretty_assertions::assert_eq;
use skiff_sync::EphemeralDocStore;
use skiff_types::PeerId;
use skiff_wire::EphemeralEntry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn entry(peer: &str, ns: &str, data: &[u8]) -> EphemeralEntry {
    EphemeralEntry {
        peer_id: PeerId::new(peer),
        namespace: ns.to_string(),
        data: data.to_vec(),
    }
}

#[test]
fn apply_and_read_back() {
    let store = EphemeralDocStore::new();
    assert!(store.apply(&entry("a", "presence", b"on")));
    assert_eq!(
        store.get("presence", &PeerId::new("a")),
        Some(b"on".to_vec())
    );
    assert_eq!(store.get("cursor", &PeerId::new("a")), None);
}

#[test]
fn unchanged_reapply_reports_no_change() {
    let store = EphemeralDocStore::new();
    assert!(store.apply(&entry("a", "presence", b"on")));
    assert!(!store.apply(&entry("a", "presence", b"on")));
    assert!(store.apply(&entry("a", "presence", b"off")));
}

#[test]
fn empty_data_deletes() {
    let store = EphemeralDocStore::new();
    store.apply(&entry("a", "presence", b"on"));
    assert!(store.apply(&entry("a", "presence", b"")));
    assert_eq!(store.get("presence", &PeerId::new("a")), None);
    // Deleting what is not there changes nothing.
    assert!(!store.apply(&entry("a", "presence", b"")));
}

#[test]
fn namespaces_are_independent() {
    let store = EphemeralDocStore::new();
    store.apply(&entry("a", "presence", b"on"));
    store.apply(&entry("a", "cursor", b"3:14"));

    assert_eq!(store.peers("presence").len(), 1);
    assert_eq!(store.peers("cursor").len(), 1);
    assert_eq!(
        store.entries_of(&PeerId::new("a")).len(),
        2,
        "snapshot covers every namespace"
    );
}

#[test]
fn remove_peer_returns_deletion_entries() {
    let store = EphemeralDocStore::new();
    store.apply(&entry("a", "presence", b"on"));
    store.apply(&entry("a", "cursor", b"1:1"));
    store.apply(&entry("b", "presence", b"on"));

    let mut deletions = store.remove_peer(&PeerId::new("a"));
    deletions.sort_by(|x, y| x.namespace.cmp(&y.namespace));
    assert_eq!(deletions.len(), 2);
    assert!(deletions.iter().all(|d| d.data.is_empty()));
    assert!(deletions.iter().all(|d| d.peer_id == PeerId::new("a")));

    assert_eq!(store.get("presence", &PeerId::new("a")), None);
    assert_eq!(
        store.get("presence", &PeerId::new("b")),
        Some(b"on".to_vec())
    );
}

#[test]
fn sweep_expires_remote_entries_but_keeps_local() {
    let store = EphemeralDocStore::new();
    let local = PeerId::new("local");
    store.apply(&entry("local", "presence", b"me"));
    store.apply(&entry("remote", "presence", b"them"));

    std::thread::sleep(Duration::from_millis(15));
    store.sweep(Duration::from_millis(10), Some(&local));

    assert_eq!(store.get("presence", &local), Some(b"me".to_vec()));
    assert_eq!(store.get("presence", &PeerId::new("remote")), None);
}

#[test]
fn touched_peers_survive_sweep() {
    let store = EphemeralDocStore::new();
    store.apply(&entry("remote", "presence", b"them"));

    std::thread::sleep(Duration::from_millis(15));
    store.touch_peer(&PeerId::new("remote"));
    store.sweep(Duration::from_millis(10), None);
    assert_eq!(
        store.get("presence", &PeerId::new("remote")),
        Some(b"them".to_vec())
    );

    // Without another touch the entry ages out.
    std::thread::sleep(Duration::from_millis(15));
    store.sweep(Duration::from_millis(10), None);
    assert_eq!(store.get("presence", &PeerId::new("remote")), None);
}

#[test]
fn fresh_entries_survive_sweep() {
    let store = EphemeralDocStore::new();
    store.apply(&entry("remote", "presence", b"them"));
    store.sweep(Duration::from_secs(30), None);
    assert_eq!(
        store.get("presence", &PeerId::new("remote")),
        Some(b"them".to_vec())
    );
}

#[test]
fn subscribers_observe_updates_and_deletions() {
    let store = EphemeralDocStore::new();
    let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = store.subscribe(move |ns, _peer, data| {
        sink.lock().unwrap().push((ns.to_string(), data.is_empty()));
    });

    store.apply(&entry("a", "presence", b"on"));
    store.apply(&entry("a", "presence", b""));

    let events = seen.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![("presence".to_string(), false), ("presence".to_string(), true)]
    );
}

#[test]
fn dropped_subscription_stops_callbacks() {
    let store = EphemeralDocStore::new();
    let seen = Arc::new(Mutex::new(0usize));
    let sink = seen.clone();
    let sub = store.subscribe(move |_, _, _| *sink.lock().unwrap() += 1);

    store.apply(&entry("a", "presence", b"1"));
    drop(sub);
    store.apply(&entry("a", "presence", b"2"));

    assert_eq!(*seen.lock().unwrap(), 1);
}
