//! The byte-level transport (§4.1 serial endpoint), expressed as a trait
//! with two implementations: a real serial backend and an in-memory
//! loopback used by tests and by dry-run mode (§9 REDESIGN FLAGS: model
//! `dry_run` as a transport trait rather than boolean branching throughout).

mod loopback;
#[cfg(feature = "serial")]
mod serial;

pub use loopback::LoopbackTransport;
#[cfg(feature = "serial")]
pub use serial::{list_ports, PortInfo, SerialTransport};

use crate::machines::grbl::error::TransportError;

/// What a blocking `read_line` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// The unblocking sentinel injected by `close()`; the reader discards
    /// this and stops.
    Sentinel,
}

/// The transport trait. Implementations must serialize concurrent writers
/// internally (the real-time bytes and queued lines may be written from
/// different threads) and must make `close()` reliably unblock a thread
/// parked in `read_line()`.
pub trait Transport: Send + Sync {
    fn open(&self, device: &str, baud: u32) -> Result<(), TransportError>;
    fn close(&self) -> Result<(), TransportError>;
    fn read_line(&self) -> Result<ReadOutcome, TransportError>;
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;
    fn write_realtime(&self, byte: u8) -> Result<(), TransportError>;
}
