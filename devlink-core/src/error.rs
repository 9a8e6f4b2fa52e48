//! Domain-specific error types for the devlink protocol.
//!
//! All fallible operations return `Result<T, LinkError>`.
//! No panics on invalid input — every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the devlink protocol.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Frame Errors ─────────────────────────────────────────────
    /// Received bytes that do not start with the frame magic.
    #[error("invalid magic bytes: expected DLK1")]
    InvalidMagic,

    /// A field in the frame header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The frame payload failed CRC-16 verification.
    #[error("crc mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    CrcMismatch { stored: u16, computed: u16 },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The protocol version offered by the peer is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// A message violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The received frame is shorter or longer than its header claims.
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidFrameLength { expected: usize, actual: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The named peer is not in the connection registry.
    #[error("no connected peer named {0:?}")]
    PeerNotConnected(String),

    /// The named service has never been announced or its lease expired.
    #[error("service {0:?} is not announced")]
    ServiceUnknown(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// UTF-8 conversion failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    // ── Remote Errors ────────────────────────────────────────────
    /// The peer answered with a non-OK status code.
    #[error("peer returned status {0}")]
    RemoteStatus(crate::message::StatusCode),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for LinkError {
    fn from(s: String) -> Self {
        LinkError::Other(s)
    }
}

impl From<&str> for LinkError {
    fn from(s: &str) -> Self {
        LinkError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LinkError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LinkError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for LinkError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        LinkError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Encoding(e.to_string())
    }
}
