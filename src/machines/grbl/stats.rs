//! Read-only session counters, supplementing the state mirror's bare
//! `rx_fill_percent`/progress-percent with the richer counters the
//! teacher's `StreamResult` already tracked (`lines_sent`, `lines_ok`,
//! `first_error`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub lines_sent: u64,
    pub lines_ok: u64,
    pub lines_errored: u64,
    pub bytes_written: u64,
    pub first_error: Option<String>,
}

impl SessionStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.lines_sent += 1;
        self.bytes_written += bytes as u64;
    }

    pub fn record_ok(&mut self) {
        self.lines_ok += 1;
    }

    pub fn record_error(&mut self, code: &str) {
        self.lines_errored += 1;
        if self.first_error.is_none() {
            self.first_error = Some(code.to_string());
        }
    }
}
