//! Error taxonomy for the grbl driver.
//!
//! [`TransportError`] and [`BufferOverflowAttempt`][GrblError::BufferOverflowAttempt]
//! are fatal to a session. `ProtocolError` (an unclassifiable line) and
//! firmware-level `error:`/`ALARM:` responses are not represented as `Err`
//! values at all — they are non-fatal and surface as ordinary
//! [`GrblEvent`](crate::machines::grbl::GrblEvent) variants instead, per the
//! recovery policy: the driver recovers locally, the embedder is the sole
//! authority for job-level retry.

use thiserror::Error;

/// Failures from the byte-level transport (serial port open/read/write).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {device} at {baud} baud: {source}")]
    Open {
        device: String,
        baud: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("transport is not open")]
    NotOpen,

    #[error("connection closed")]
    Disconnected,
}

/// Top-level error type returned by the orchestrator's public methods.
#[derive(Debug, Error)]
pub enum GrblError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The flow controller attempted to exceed the receive buffer capacity.
    /// This is a programming bug, never a reachable outcome of normal
    /// operation; if it is ever observed the session is aborted.
    #[error(
        "buffer overflow attempt: {attempted} bytes would push in-flight total to {would_be} (capacity {capacity})"
    )]
    BufferOverflowAttempt {
        attempted: usize,
        would_be: usize,
        capacity: usize,
    },

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,
}
