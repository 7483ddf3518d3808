//! Error taxonomies for decoding and reassembly.
//!
//! Both sets are closed: every way a frame or fragment can be rejected
//! maps to exactly one variant. Decode and reassembly failures are local
//! to the offending input — callers log and drop, the channel survives.

use thiserror::Error;

/// Ways a frame can fail to decode.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not well-formed CBOR.
    #[error("invalid CBOR payload: {0}")]
    InvalidCbor(String),

    /// The version byte is not the supported wire version.
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    /// The buffer ends before the declared payload length.
    #[error("truncated frame")]
    TruncatedFrame,

    /// A required field is absent from a message map.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field or discriminator holds a value of the wrong shape.
    #[error("invalid type for `{0}`")]
    InvalidType(&'static str),
}

/// Ways fragment reassembly can fail.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Fragment header shorter than its fixed layout.
    #[error("truncated fragment header")]
    TruncatedHeader,

    /// Data fragment shorter than its fixed prefix.
    #[error("truncated fragment data")]
    TruncatedData,

    /// Batch evicted with fragments still outstanding.
    #[error("missing fragments")]
    MissingFragments,

    /// Sum of chunk lengths disagrees with the declared total.
    #[error("reassembled size mismatch")]
    SizeMismatch,

    /// Fragment index at or past the declared count.
    #[error("fragment index out of range")]
    InvalidIndex,

    /// First byte is none of the known fragment discriminators.
    #[error("unknown fragment prefix")]
    UnknownPrefix,
}
