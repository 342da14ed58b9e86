//! The streaming flow-control engine (§4.6): two streaming disciplines that
//! keep the firmware's fixed-size receive buffer as full as possible
//! without overflow, while tracking per-line completion.

mod controller;
mod queue;

pub use controller::{AckOutcome, FlowController, FlowState, SendItem, StreamingMode};
pub use queue::{InflightEntry, InflightLog, Stash};
