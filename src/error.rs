//! Error types for the emoji registry

use std::time::Duration;

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, HivemojiError>;

/// Registry errors
#[derive(Error, Debug)]
pub enum HivemojiError {
    #[error("Unsupported image format; use PNG, WebP, or GIF/APNG")]
    UnsupportedFormat,

    #[error("Image dimensions must be positive numbers, got {width}x{height}")]
    InvalidDimensions { width: u64, height: u64 },

    #[error("Emoji name must match [a-z0-9_]{{1,32}}: {0:?}")]
    InvalidName(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Image too large: {0}")]
    TooLarge(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Incomplete asset: fragment {missing} of {total} is missing")]
    Incomplete { missing: u32, total: u32 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Snapshot store error: {0}")]
    Store(String),

    #[error("Broadcast {index}/{total} rejected: {reason}")]
    BroadcastRejected {
        index: usize,
        total: usize,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

/// Failures of an external round-trip (log fetch or broadcast).
///
/// `Clone` so that every caller coalesced onto one fetch receives the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed upstream response: {0}")]
    Malformed(String),

    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

/// Why a single ledger record was skipped during interpretation.
///
/// Never escapes the interpreter: a rejected record is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordRejected {
    #[error("record belongs to protocol {0:?}")]
    ForeignProtocol(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(String),

    #[error("invalid emoji name {0:?}")]
    InvalidName(String),

    #[error("mime {0:?} is not an allowed image type")]
    UnsupportedMime(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid base64 in `{0}`")]
    InvalidData(&'static str),

    #[error("payload of {size} bytes exceeds the {max} byte bound")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("dimensions must be positive finite numbers")]
    InvalidDimensions,

    #[error("chunk total {0} is out of range")]
    InvalidTotal(u64),

    #[error("chunk seq {seq} is outside 0..{total}")]
    SeqOutOfRange { seq: u64, total: u64 },
}
