use pretty_assertions::assert_eq;
use skiff_crdt::{CausalOrder, CrdtDoc, ExportMode, MockDoc, VersionVector};
use std::sync::{Arc, Mutex};

fn doc(writer: &str) -> MockDoc {
    MockDoc::new(writer)
}

// ── Local operations ─────────────────────────────────────────────

#[test]
fn empty_doc_has_empty_version() {
    let d = doc("a");
    assert!(d.version().is_empty());
    assert_eq!(d.op_count(), 0);
    assert_eq!(d.text(), "");
}

#[test]
fn local_ops_advance_version_and_count() {
    let mut d = doc("a");
    d.insert_text("ab");
    d.insert_text("c");
    assert_eq!(d.op_count(), 2);
    assert!(!d.version().is_empty());
    assert_eq!(d.text(), "abc");
}

#[test]
fn detached_contract_is_trivial() {
    let mut d = doc("a");
    assert!(!d.is_detached());
    d.checkout_to_latest().unwrap();
}

// ── Export / import ──────────────────────────────────────────────

#[test]
fn snapshot_roundtrip_converges() {
    let mut a = doc("a");
    a.insert_text("a");
    a.insert_text("b");
    a.insert_text("c");

    let mut b = doc("b");
    let snapshot = a.export(ExportMode::Snapshot).unwrap();
    b.import(&snapshot).unwrap();

    assert_eq!(b.text(), "abc");
    assert_eq!(b.op_count(), 3);
    assert_eq!(
        a.compare(&a.version(), &b.version()).unwrap(),
        CausalOrder::Equal
    );
}

#[test]
fn delta_export_contains_only_newer_ops() {
    let mut a = doc("a");
    a.insert_text("x");
    let early = a.version();

    let mut b = doc("b");
    b.import(&a.export(ExportMode::Snapshot).unwrap()).unwrap();

    a.insert_text("y");
    let delta = a.export(ExportMode::UpdatesSince(early)).unwrap();
    b.import(&delta).unwrap();

    assert_eq!(b.text(), "xy");
    assert_eq!(b.op_count(), 2);
}

#[test]
fn delta_since_own_version_is_empty_import() {
    let mut a = doc("a");
    a.insert_text("x");
    let v = a.version();
    let delta = a.export(ExportMode::UpdatesSince(v)).unwrap();

    let mut b = doc("b");
    b.import(&a.export(ExportMode::Snapshot).unwrap()).unwrap();
    let before = b.version();
    b.import(&delta).unwrap();
    assert_eq!(b.version(), before);
}

#[test]
fn concurrent_edits_merge_commutatively() {
    let mut a = doc("a");
    let mut b = doc("b");
    a.insert_text("left");
    b.insert_text("right");

    let from_a = a.export(ExportMode::Snapshot).unwrap();
    let from_b = b.export(ExportMode::Snapshot).unwrap();
    a.import(&from_b).unwrap();
    b.import(&from_a).unwrap();

    assert_eq!(a.text(), b.text());
    assert_eq!(a.op_count(), 2);
    assert_eq!(
        a.compare(&a.version(), &b.version()).unwrap(),
        CausalOrder::Equal
    );
}

#[test]
fn import_is_idempotent() {
    let mut a = doc("a");
    a.insert_text("x");
    let snapshot = a.export(ExportMode::Snapshot).unwrap();

    let mut b = doc("b");
    b.import(&snapshot).unwrap();
    b.import(&snapshot).unwrap();
    assert_eq!(b.op_count(), 1);
}

#[test]
fn import_rejects_garbage() {
    let mut d = doc("a");
    assert!(d.import(b"definitely not cbor").is_err());
}

// ── Version comparison ───────────────────────────────────────────

#[test]
fn compare_orders() {
    let mut a = doc("a");
    let empty = a.version();
    a.insert_text("x");
    let one = a.version();
    a.insert_text("y");
    let two = a.version();

    assert_eq!(a.compare(&one, &one).unwrap(), CausalOrder::Equal);
    assert_eq!(a.compare(&one, &two).unwrap(), CausalOrder::Before);
    assert_eq!(a.compare(&two, &one).unwrap(), CausalOrder::After);
    assert_eq!(a.compare(&empty, &one).unwrap(), CausalOrder::Before);

    let mut b = doc("b");
    b.insert_text("z");
    assert_eq!(
        a.compare(&one, &b.version()).unwrap(),
        CausalOrder::Concurrent
    );
}

#[test]
fn compare_rejects_foreign_bytes() {
    let a = doc("a");
    let bogus = VersionVector::from_bytes(vec![0xff, 0x00, 0x13]);
    assert!(a.compare(&bogus, &a.version()).is_err());
}

// ── Subscriptions ────────────────────────────────────────────────

#[test]
fn subscribers_fire_on_local_and_import() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let mut a = doc("a");
    let id = a.subscribe(Box::new(move |change| {
        sink.lock().unwrap().push(change.origin);
    }));

    a.insert_text("x");

    let mut b = doc("b");
    b.insert_text("y");
    a.import(&b.export(ExportMode::Snapshot).unwrap()).unwrap();

    // Re-importing known ops must not notify.
    a.import(&b.export(ExportMode::Snapshot).unwrap()).unwrap();

    a.unsubscribe(id);
    a.insert_text("z");

    let origins = seen.lock().unwrap().clone();
    assert_eq!(origins.len(), 2);
    assert_eq!(origins[0], skiff_crdt::ChangeOrigin::Local);
    assert_eq!(origins[1], skiff_crdt::ChangeOrigin::Import);
}
