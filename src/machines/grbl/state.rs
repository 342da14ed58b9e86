//! The mirrored firmware state, updated only from parsed inbound events.
//!
//! Single-writer (the dispatcher thread), multi-reader discipline: the
//! orchestrator hands out snapshots by value, never a shared reference, so a
//! reader never observes a half-updated struct.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// grbl's reported machine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Idle,
    Run,
    Hold,
    Queue,
    Alarm,
    Check,
    Home,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Idle
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One `$N=V (comment)` settings line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub value: String,
    pub comment: String,
}

/// Number of modal groups grbl reports in a `[G0 G54 G17 G21 G90 G94 M0 M5
/// M9 T0 F0 S0]` parser-state line.
pub const PARSER_MODE_COUNT: usize = 12;

/// Outcome of applying a `StatusUpdate` to the state mirror, used by the
/// orchestrator to decide which derived events to emit.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusApplyResult {
    pub feed_changed: bool,
    pub entered_run: bool,
    pub left_run: bool,
    pub bufsize_changed: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareState {
    pub mode: Mode,
    pub machine_position: Position,
    pub working_position: Position,
    pub feed_current: f64,
    pub rx_fill_percent: u8,
    pub settings: HashMap<u32, SettingEntry>,
    pub parser_modes: Vec<String>,
    pub hash_offsets: HashMap<String, Vec<f64>>,
    #[serde(skip)]
    last_bufsize: Option<usize>,
}

impl Default for FirmwareState {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareState {
    pub fn new() -> Self {
        Self {
            mode: Mode::Idle,
            machine_position: Position::default(),
            working_position: Position::default(),
            feed_current: 0.0,
            rx_fill_percent: 0,
            settings: HashMap::new(),
            parser_modes: Vec::new(),
            hash_offsets: HashMap::new(),
            last_bufsize: None,
        }
    }

    /// Resets to a fresh default state, as happens on `Boot`.
    pub fn apply_boot(&mut self) {
        *self = Self::new();
    }

    /// Applies a parsed `<...>` status line. Returns which derived events
    /// the caller should emit.
    pub fn apply_status(
        &mut self,
        mode: Mode,
        machine_position: Position,
        working_position: Position,
        feed: Option<f64>,
        bufsize: Option<usize>,
        rx_fill_percent: u8,
    ) -> StatusApplyResult {
        let mut result = StatusApplyResult::default();

        let was_run = self.mode == Mode::Run;
        self.mode = mode;
        self.machine_position = machine_position;
        self.working_position = working_position;
        self.rx_fill_percent = rx_fill_percent;

        if let Some(feed) = feed {
            if (feed - self.feed_current).abs() > f64::EPSILON {
                result.feed_changed = true;
            }
            self.feed_current = feed;
        }

        if let Some(bufsize) = bufsize {
            if self.last_bufsize != Some(bufsize) {
                result.bufsize_changed = Some(bufsize);
            }
            self.last_bufsize = Some(bufsize);
        }

        let is_run = self.mode == Mode::Run;
        result.entered_run = is_run && !was_run;
        result.left_run = was_run && !is_run;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_resets_to_defaults() {
        let mut state = FirmwareState::new();
        state.mode = Mode::Alarm;
        state.feed_current = 400.0;
        state.settings.insert(
            130,
            SettingEntry {
                value: "200.000".into(),
                comment: "x max travel, mm".into(),
            },
        );
        state.apply_boot();
        assert_eq!(state.mode, Mode::Idle);
        assert_eq!(state.feed_current, 0.0);
        assert!(state.settings.is_empty());
    }

    #[test]
    fn status_update_detects_run_transitions() {
        let mut state = FirmwareState::new();
        let r = state.apply_status(Mode::Run, Position::default(), Position::default(), None, None, 0);
        assert!(r.entered_run);
        assert!(!r.left_run);

        let r = state.apply_status(Mode::Idle, Position::default(), Position::default(), None, None, 0);
        assert!(!r.entered_run);
        assert!(r.left_run);
    }

    #[test]
    fn status_update_detects_feed_change() {
        let mut state = FirmwareState::new();
        let r = state.apply_status(Mode::Run, Position::default(), Position::default(), Some(500.0), None, 0);
        assert!(r.feed_changed);
        let r = state.apply_status(Mode::Run, Position::default(), Position::default(), Some(500.0), None, 0);
        assert!(!r.feed_changed);
        let r = state.apply_status(Mode::Run, Position::default(), Position::default(), Some(600.0), None, 0);
        assert!(r.feed_changed);
    }

    #[test]
    fn status_update_detects_bufsize_change() {
        let mut state = FirmwareState::new();
        let r = state.apply_status(Mode::Idle, Position::default(), Position::default(), None, Some(15), 0);
        assert_eq!(r.bufsize_changed, Some(15));
        let r = state.apply_status(Mode::Idle, Position::default(), Position::default(), None, Some(15), 0);
        assert_eq!(r.bufsize_changed, None);
    }
}
