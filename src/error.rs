//! Error types for nspwire.

use thiserror::Error;

/// Main error type for all nspwire operations.
#[derive(Debug, Error)]
pub enum NspwireError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (text codec payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed packet in the incoming stream.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Transport framing violation (oversized frame, bad kind byte, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connect request for a namespace the registry does not know.
    #[error("Invalid namespace: {0}")]
    UnknownNamespace(String),

    /// The namespace refused to attach the client.
    #[error("Namespace {nsp} rejected connection: {reason}")]
    NamespaceRejected { nsp: String, reason: String },

    /// The transport event stream was already taken by another subscriber.
    #[error("Transport events already subscribed")]
    AlreadySubscribed,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The stream stopped accepting writes for longer than the configured timeout.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// The transport's outgoing queue hit its hard cap.
    #[error("Write buffer full")]
    WriteBufferFull,
}

/// Result type alias using NspwireError.
pub type Result<T> = std::result::Result<T, NspwireError>;
