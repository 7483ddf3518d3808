//! Wire format for the skiff replication core.
//!
//! Three layers, outermost first:
//!
//! 1. **Fragmentation** — transports with payload limits split frames
//!    into indexed chunks ([`fragment_payload`], [`Reassembler`]).
//! 2. **Framing** — version byte, flags, big-endian length prefix
//!    ([`encode_frame`], [`encode_batch_frame`], [`decode_frame`]).
//! 3. **Payload** — CBOR maps with short keys and a numeric type
//!    discriminator ([`Message`]).
//!
//! Decode and reassembly failures use closed error sets and never take
//! the channel down; callers log and drop the offending input.

mod codec;
mod error;
mod fragment;
mod message;
mod reassembly;

pub use codec::{
    decode_frame, encode_batch_frame, encode_frame, from_wire_value, to_wire_value, FLAG_BATCH,
    FRAME_HEADER_LEN, WIRE_VERSION,
};
pub use error::{DecodeError, ReassemblyError};
pub use fragment::{
    fragment_payload, BatchId, FragmentPayload, BATCH_ID_LEN, DATA_OVERHEAD, HEADER_OVERHEAD,
    PREFIX_COMPLETE, PREFIX_DATA, PREFIX_HEADER,
};
pub use message::{
    DeleteStatus, EphemeralEntry, EphemeralMessage, Message, Transmission, TYPE_BATCH,
    TYPE_DELETE_REQUEST, TYPE_DELETE_RESPONSE, TYPE_DIRECTORY_REQUEST, TYPE_DIRECTORY_RESPONSE,
    TYPE_EPHEMERAL, TYPE_ESTABLISH_REQUEST, TYPE_ESTABLISH_RESPONSE, TYPE_NEW_DOC,
    TYPE_SYNC_REQUEST, TYPE_SYNC_RESPONSE, TYPE_UPDATE,
};
pub use reassembly::{EvictReason, ReassemblyConfig, ReassemblyOutcome, Reassembler};
