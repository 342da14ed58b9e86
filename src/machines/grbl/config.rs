//! Driver configuration.
//!
//! Generalizes the teacher's scattered `pub const` timing values
//! (`LINE_RESPONSE_TIMEOUT_MS`, `POLL_INTERVAL_MS`, `STATUS_READ_TIMEOUT_MS`)
//! into one configuration value the embedder can override.

use crate::machines::grbl::flow::StreamingMode;
use std::time::Duration;

/// Default grbl receive-buffer capacity in bytes (`C` in the spec).
pub const DEFAULT_RECEIVE_BUFFER_CAPACITY: usize = 128;

/// Default poller interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct GrblConfig {
    /// Receive buffer capacity `C`. Lines in flight may never sum to more
    /// than this many bytes (including the trailing newline of each line).
    pub receive_buffer_capacity: usize,

    /// Interval between automatic `?` status polls.
    pub poll_interval: Duration,

    /// How long to wait for an `ok`/`error` before considering a line lost.
    /// Not enforced by the flow controller itself (no watchdog retransmit
    /// is in scope), but available to embedders building one on top.
    pub line_response_timeout: Duration,

    /// Budget for a best-effort drain on `disconnect()` when
    /// `discard_pending_writes_on_disconnect` is false.
    pub disconnect_drain_timeout: Duration,

    /// If true (default), `disconnect()` clears any unsent queued lines
    /// immediately rather than attempting to drain them first.
    pub discard_pending_writes_on_disconnect: bool,

    /// Streaming discipline a newly connected session starts in.
    pub initial_streaming_mode: StreamingMode,
}

impl Default for GrblConfig {
    fn default() -> Self {
        Self {
            receive_buffer_capacity: DEFAULT_RECEIVE_BUFFER_CAPACITY,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            line_response_timeout: Duration::from_secs(30),
            disconnect_drain_timeout: Duration::from_secs(2),
            discard_pending_writes_on_disconnect: true,
            initial_streaming_mode: StreamingMode::CharacterCounting,
        }
    }
}
