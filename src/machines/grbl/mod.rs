//! grbl driver: a transport-agnostic, threaded host-side implementation of
//! the serial G-Code streaming protocol spoken by grbl firmware.
//!
//! **Public API:** [`Grbl`] — `cnect`/`disconnect`, `stream`/`send_immediately`,
//! `pause`/`resume`/`halt`/`unstash`, `softreset`, and the `$$`/`$#`/`$G`
//! query helpers. Events reach the embedder through a single callback
//! carrying [`GrblEvent`]. Use [`transport::list_ports`] (behind the
//! `serial` feature) to discover ports.

mod commands;
mod config;
mod error;
mod event;
mod flow;
mod orchestrator;
mod parser;
mod poller;
mod preprocessor;
mod reader;
mod stats;
mod state;
pub mod transport;

pub use commands::{GrblQuery, RealtimeByte};
pub use config::GrblConfig;
pub use error::{GrblError, TransportError};
pub use event::GrblEvent;
pub use flow::{AckOutcome, FlowState, SendItem, StreamingMode};
pub use orchestrator::Grbl;
pub use parser::{Accumulated, ParsedLine, ResponseParser};
pub use preprocessor::{FeedOverridePreprocessor, FeedOverrideState, PassThroughPreprocessor, Preprocessor};
pub use stats::SessionStats;
pub use state::{FirmwareState, Mode, Position, SettingEntry, PARSER_MODE_COUNT};

#[cfg(feature = "serial")]
pub use transport::{list_ports, PortInfo, SerialTransport};
pub use transport::LoopbackTransport;
