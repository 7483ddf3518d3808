//! Transport-level fragmentation.
//!
//! Transports with payload limits split frames into chunks. Every
//! transport payload starts with a one-byte discriminator:
//!
//! ```text
//! 0x00  complete — remainder is a whole frame
//! 0x01  header   — batch_id[8] ‖ count u32 BE ‖ total_size u32 BE
//! 0x02  data     — batch_id[8] ‖ index u32 BE ‖ chunk bytes
//! ```
//!
//! Chunks carry explicit indices, so any delivery order reassembles.

use crate::error::ReassemblyError;
use rand::RngCore;

/// Payload carries a whole frame.
pub const PREFIX_COMPLETE: u8 = 0x00;
/// Payload is a fragment-batch header.
pub const PREFIX_HEADER: u8 = 0x01;
/// Payload is one data chunk.
pub const PREFIX_DATA: u8 = 0x02;

/// Length of a fragment batch id.
pub const BATCH_ID_LEN: usize = 8;
/// Fixed bytes of a header payload (prefix + id + count + total size).
pub const HEADER_OVERHEAD: usize = 1 + BATCH_ID_LEN + 4 + 4;
/// Fixed bytes preceding the chunk in a data payload.
pub const DATA_OVERHEAD: usize = 1 + BATCH_ID_LEN + 4;

/// Random identifier tying the fragments of one payload together.
pub type BatchId = [u8; BATCH_ID_LEN];

/// A parsed transport payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentPayload {
    /// A whole frame, no reassembly needed.
    Complete(Vec<u8>),
    /// Declares an incoming batch of `count` chunks, `total_size` bytes.
    Header {
        /// Batch identifier.
        batch_id: BatchId,
        /// Number of data chunks to expect.
        count: u32,
        /// Byte length of the reassembled payload.
        total_size: u32,
    },
    /// One chunk of a batch.
    Data {
        /// Batch identifier.
        batch_id: BatchId,
        /// Position of this chunk.
        index: u32,
        /// The chunk bytes.
        chunk: Vec<u8>,
    },
}

impl FragmentPayload {
    /// Parses a raw transport payload.
    pub fn parse(bytes: &[u8]) -> Result<Self, ReassemblyError> {
        let Some((&prefix, rest)) = bytes.split_first() else {
            return Err(ReassemblyError::UnknownPrefix);
        };
        match prefix {
            PREFIX_COMPLETE => Ok(Self::Complete(rest.to_vec())),
            PREFIX_HEADER => {
                if rest.len() < HEADER_OVERHEAD - 1 {
                    return Err(ReassemblyError::TruncatedHeader);
                }
                let mut batch_id = [0u8; BATCH_ID_LEN];
                batch_id.copy_from_slice(&rest[..BATCH_ID_LEN]);
                let count = u32::from_be_bytes(
                    rest[BATCH_ID_LEN..BATCH_ID_LEN + 4].try_into().unwrap_or_default(),
                );
                let total_size = u32::from_be_bytes(
                    rest[BATCH_ID_LEN + 4..BATCH_ID_LEN + 8]
                        .try_into()
                        .unwrap_or_default(),
                );
                Ok(Self::Header {
                    batch_id,
                    count,
                    total_size,
                })
            }
            PREFIX_DATA => {
                if rest.len() < DATA_OVERHEAD - 1 {
                    return Err(ReassemblyError::TruncatedData);
                }
                let mut batch_id = [0u8; BATCH_ID_LEN];
                batch_id.copy_from_slice(&rest[..BATCH_ID_LEN]);
                let index = u32::from_be_bytes(
                    rest[BATCH_ID_LEN..BATCH_ID_LEN + 4].try_into().unwrap_or_default(),
                );
                Ok(Self::Data {
                    batch_id,
                    index,
                    chunk: rest[BATCH_ID_LEN + 4..].to_vec(),
                })
            }
            _ => Err(ReassemblyError::UnknownPrefix),
        }
    }

    /// Serializes back to a raw transport payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Complete(frame) => {
                let mut out = Vec::with_capacity(1 + frame.len());
                out.push(PREFIX_COMPLETE);
                out.extend_from_slice(frame);
                out
            }
            Self::Header {
                batch_id,
                count,
                total_size,
            } => {
                let mut out = Vec::with_capacity(HEADER_OVERHEAD);
                out.push(PREFIX_HEADER);
                out.extend_from_slice(batch_id);
                out.extend_from_slice(&count.to_be_bytes());
                out.extend_from_slice(&total_size.to_be_bytes());
                out
            }
            Self::Data {
                batch_id,
                index,
                chunk,
            } => {
                let mut out = Vec::with_capacity(DATA_OVERHEAD + chunk.len());
                out.push(PREFIX_DATA);
                out.extend_from_slice(batch_id);
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(chunk);
                out
            }
        }
    }
}

/// Splits a frame into transport payloads for the given threshold.
///
/// Payloads at or under the threshold travel as a single complete
/// payload. Larger ones become one header plus `⌈len/threshold⌉` data
/// chunks under a fresh random batch id.
#[must_use]
pub fn fragment_payload(frame: &[u8], threshold: usize) -> Vec<Vec<u8>> {
    assert!(threshold > 0, "fragmentation threshold must be positive");

    if frame.len() <= threshold {
        return vec![FragmentPayload::Complete(frame.to_vec()).encode()];
    }

    let mut batch_id = [0u8; BATCH_ID_LEN];
    rand::thread_rng().fill_bytes(&mut batch_id);

    let chunks: Vec<&[u8]> = frame.chunks(threshold).collect();
    let mut out = Vec::with_capacity(chunks.len() + 1);
    out.push(
        FragmentPayload::Header {
            batch_id,
            count: chunks.len() as u32,
            total_size: frame.len() as u32,
        }
        .encode(),
    );
    for (index, chunk) in chunks.into_iter().enumerate() {
        out.push(
            FragmentPayload::Data {
                batch_id,
                index: index as u32,
                chunk: chunk.to_vec(),
            }
            .encode(),
        );
    }
    out
}
