//! Fragmentation tests: split counts, overhead, payload parsing.

use pretty_assertions::assert_eq;
use skiff_wire::{
    fragment_payload, FragmentPayload, ReassemblyError, DATA_OVERHEAD, HEADER_OVERHEAD,
    PREFIX_COMPLETE, PREFIX_DATA, PREFIX_HEADER,
};

#[test]
fn small_payload_stays_complete() {
    let payloads = fragment_payload(b"hello", 100);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0][0], PREFIX_COMPLETE);
    assert_eq!(&payloads[0][1..], b"hello");
}

#[test]
fn payload_at_threshold_stays_complete() {
    let frame = vec![7u8; 100];
    let payloads = fragment_payload(&frame, 100);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0][0], PREFIX_COMPLETE);
}

#[test]
fn payload_over_threshold_fragments() {
    let frame = vec![7u8; 101];
    let payloads = fragment_payload(&frame, 100);
    // ⌈101/100⌉ data fragments plus one header.
    assert_eq!(payloads.len(), 3);
    assert_eq!(payloads[0][0], PREFIX_HEADER);
    assert_eq!(payloads[1][0], PREFIX_DATA);
    assert_eq!(payloads[2][0], PREFIX_DATA);
}

#[test]
fn snapshot_sized_payload_fragments_as_specified() {
    // 250 KiB at a 100 KiB threshold: one header, three data chunks.
    let frame = vec![1u8; 250 * 1024];
    let threshold = 100 * 1024;
    let payloads = fragment_payload(&frame, threshold);
    assert_eq!(payloads.len(), 4);

    let FragmentPayload::Header {
        count, total_size, ..
    } = FragmentPayload::parse(&payloads[0]).unwrap()
    else {
        panic!("first payload must be the header");
    };
    assert_eq!(count, 3);
    assert_eq!(total_size as usize, frame.len());
}

#[test]
fn overhead_is_17_plus_13_per_fragment() {
    let frame = vec![0u8; 250];
    let payloads = fragment_payload(&frame, 100);
    assert_eq!(payloads[0].len(), HEADER_OVERHEAD);
    assert_eq!(payloads[0].len(), 17);
    assert_eq!(payloads[1].len(), DATA_OVERHEAD + 100);
    assert_eq!(DATA_OVERHEAD, 13);
    // Last chunk carries the remainder.
    assert_eq!(payloads[3].len(), DATA_OVERHEAD + 50);
}

#[test]
fn fragments_share_one_batch_id_with_sequential_indices() {
    let frame = vec![3u8; 300];
    let payloads = fragment_payload(&frame, 100);

    let FragmentPayload::Header { batch_id, .. } = FragmentPayload::parse(&payloads[0]).unwrap()
    else {
        panic!("expected header");
    };
    for (expected_index, raw) in payloads[1..].iter().enumerate() {
        let FragmentPayload::Data {
            batch_id: data_batch,
            index,
            chunk,
        } = FragmentPayload::parse(raw).unwrap()
        else {
            panic!("expected data fragment");
        };
        assert_eq!(data_batch, batch_id);
        assert_eq!(index as usize, expected_index);
        assert_eq!(chunk.len(), 100);
    }
}

#[test]
fn parse_encode_roundtrip() {
    for payload in [
        FragmentPayload::Complete(b"frame".to_vec()),
        FragmentPayload::Header {
            batch_id: [8; 8],
            count: 4,
            total_size: 400,
        },
        FragmentPayload::Data {
            batch_id: [8; 8],
            index: 2,
            chunk: vec![1, 2, 3],
        },
    ] {
        assert_eq!(FragmentPayload::parse(&payload.encode()).unwrap(), payload);
    }
}

#[test]
fn unknown_prefix_is_rejected() {
    assert_eq!(
        FragmentPayload::parse(&[0x09, 1, 2, 3]),
        Err(ReassemblyError::UnknownPrefix)
    );
    assert_eq!(FragmentPayload::parse(&[]), Err(ReassemblyError::UnknownPrefix));
}

#[test]
fn truncated_header_and_data_are_rejected() {
    assert_eq!(
        FragmentPayload::parse(&[PREFIX_HEADER, 1, 2, 3]),
        Err(ReassemblyError::TruncatedHeader)
    );
    assert_eq!(
        FragmentPayload::parse(&[PREFIX_DATA, 1, 2, 3]),
        Err(ReassemblyError::TruncatedData)
    );
}
