//! Reassembler tests: order independence, limits, eviction callbacks.

use pretty_assertions::assert_eq;
use skiff_wire::{
    fragment_payload, EvictReason, FragmentPayload, ReassemblyConfig, ReassemblyError,
    ReassemblyOutcome, Reassembler,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn reassembler() -> Reassembler {
    Reassembler::new(ReassemblyConfig::default())
}

fn feed_all(reassembler: &mut Reassembler, payloads: &[Vec<u8>]) -> Option<Vec<u8>> {
    let mut complete = None;
    for payload in payloads {
        match reassembler.accept(payload).unwrap() {
            ReassemblyOutcome::Complete(frame) => complete = Some(frame),
            ReassemblyOutcome::Pending => {}
        }
    }
    complete
}

#[test]
fn complete_payload_passes_through() {
    let mut r = reassembler();
    let payload = FragmentPayload::Complete(b"frame".to_vec()).encode();
    assert_eq!(
        r.accept(&payload).unwrap(),
        ReassemblyOutcome::Complete(b"frame".to_vec())
    );
    assert_eq!(r.batch_count(), 0);
}

#[test]
fn in_order_reassembly_restores_payload() {
    let frame: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let payloads = fragment_payload(&frame, 128);
    let mut r = reassembler();
    assert_eq!(feed_all(&mut r, &payloads), Some(frame));
    assert_eq!(r.buffered_bytes(), 0);
}

#[test]
fn out_of_order_reassembly_restores_payload() {
    let frame: Vec<u8> = (0..900u32).map(|i| (i % 251) as u8).collect();
    let mut payloads = fragment_payload(&frame, 100);
    payloads.reverse();
    let mut r = reassembler();
    assert_eq!(feed_all(&mut r, &payloads), Some(frame));
}

#[test]
fn header_arriving_last_still_completes() {
    let frame = vec![5u8; 300];
    let payloads = fragment_payload(&frame, 100);
    let mut r = reassembler();
    let reordered: Vec<Vec<u8>> = payloads[1..]
        .iter()
        .chain(std::iter::once(&payloads[0]))
        .cloned()
        .collect();
    assert_eq!(feed_all(&mut r, &reordered), Some(frame));
}

#[test]
fn index_at_count_is_rejected() {
    let mut r = reassembler();
    let batch_id = [1u8; 8];
    r.accept_payload(FragmentPayload::Header {
        batch_id,
        count: 2,
        total_size: 20,
    })
    .unwrap();
    let result = r.accept_payload(FragmentPayload::Data {
        batch_id,
        index: 2,
        chunk: vec![0; 10],
    });
    assert_eq!(result, Err(ReassemblyError::InvalidIndex));
}

#[test]
fn size_mismatch_is_reported_on_completion() {
    let mut r = reassembler();
    let batch_id = [2u8; 8];
    r.accept_payload(FragmentPayload::Header {
        batch_id,
        count: 1,
        total_size: 999,
    })
    .unwrap();
    let result = r.accept_payload(FragmentPayload::Data {
        batch_id,
        index: 0,
        chunk: vec![0; 10],
    });
    assert_eq!(result, Err(ReassemblyError::SizeMismatch));
    // The failed batch is freed.
    assert_eq!(r.batch_count(), 0);
    assert_eq!(r.buffered_bytes(), 0);
}

#[test]
fn idle_batches_time_out_and_notify() {
    let mut r = Reassembler::new(ReassemblyConfig {
        batch_timeout: Duration::from_millis(10),
        ..ReassemblyConfig::default()
    });
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = evicted.clone();
    r.set_evict_callback(move |batch, reason| sink.lock().unwrap().push((batch, reason)));

    let batch_id = [3u8; 8];
    r.accept_payload(FragmentPayload::Data {
        batch_id,
        index: 0,
        chunk: vec![0; 4],
    })
    .unwrap();
    assert_eq!(r.batch_count(), 1);

    std::thread::sleep(Duration::from_millis(25));
    r.sweep();

    assert_eq!(r.batch_count(), 0);
    assert_eq!(r.buffered_bytes(), 0);
    assert_eq!(
        evicted.lock().unwrap().as_slice(),
        &[(batch_id, EvictReason::Timeout)]
    );
}

#[test]
fn batch_overflow_evicts_least_recently_touched() {
    let mut r = Reassembler::new(ReassemblyConfig {
        max_batches: 2,
        ..ReassemblyConfig::default()
    });
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = evicted.clone();
    r.set_evict_callback(move |batch, reason| sink.lock().unwrap().push((batch, reason)));

    for id in 1..=3u8 {
        r.accept_payload(FragmentPayload::Data {
            batch_id: [id; 8],
            index: 0,
            chunk: vec![0; 4],
        })
        .unwrap();
        // Keep touch timestamps strictly ordered.
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(r.batch_count(), 2);
    assert_eq!(
        evicted.lock().unwrap().as_slice(),
        &[([1u8; 8], EvictReason::BatchOverflow)]
    );
}

#[test]
fn memory_cap_evicts_old_batches() {
    let mut r = Reassembler::new(ReassemblyConfig {
        max_total_bytes: 1024,
        ..ReassemblyConfig::default()
    });
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = evicted.clone();
    r.set_evict_callback(move |batch, reason| sink.lock().unwrap().push((batch, reason)));

    r.accept_payload(FragmentPayload::Data {
        batch_id: [1u8; 8],
        index: 0,
        chunk: vec![0; 800],
    })
    .unwrap();
    std::thread::sleep(Duration::from_millis(2));
    r.accept_payload(FragmentPayload::Data {
        batch_id: [2u8; 8],
        index: 0,
        chunk: vec![0; 800],
    })
    .unwrap();

    assert!(r.buffered_bytes() <= 1024);
    assert_eq!(
        evicted.lock().unwrap().as_slice(),
        &[([1u8; 8], EvictReason::MemoryOverflow)]
    );
}

#[test]
fn duplicate_chunks_do_not_inflate_memory() {
    let mut r = reassembler();
    let batch_id = [4u8; 8];
    for _ in 0..3 {
        r.accept_payload(FragmentPayload::Data {
            batch_id,
            index: 0,
            chunk: vec![0; 100],
        })
        .unwrap();
    }
    assert_eq!(r.buffered_bytes(), 100);
}

#[test]
fn dispose_releases_everything() {
    let mut r = reassembler();
    r.accept_payload(FragmentPayload::Data {
        batch_id: [5u8; 8],
        index: 0,
        chunk: vec![0; 64],
    })
    .unwrap();
    r.dispose();
    assert_eq!(r.batch_count(), 0);
    assert_eq!(r.buffered_bytes(), 0);
}
