//! The tagged-variant event type dispatched to the embedder's callback.
//!
//! Replaces the distilled spec's dynamic, positional-payload callback (one
//! variant per `on_*` name in the public interface) so the embedder matches
//! on a closed enum instead of dispatching on a string name at runtime.

use crate::machines::grbl::state::{Mode, Position, SettingEntry};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum GrblEvent {
    Boot,
    Disconnected,
    Log(String),
    Read(String),
    Write(Vec<u8>),
    StateUpdate {
        mode: Mode,
        machine_position: Position,
        working_position: Position,
    },
    HashStateUpdate(HashMap<String, Vec<f64>>),
    GcodeParserStateUpdate(Vec<String>),
    SettingsDownloaded(HashMap<u32, SettingEntry>),
    FeedChange(f64),
    Movement,
    Standstill,
    LineSent {
        index: u64,
        text: String,
    },
    ProcessedCommand {
        index: u64,
        text: String,
    },
    ProgressPercent(u8),
    RxBufferPercent(u8),
    BufsizeChange(usize),
    VarsChange(HashMap<String, String>),
    JobCompleted,
    Alarm(String),
    Error {
        index: u64,
        text: String,
        code: String,
    },
    Probe(Vec<f64>),
}
