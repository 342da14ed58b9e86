//! The trait boundary the flow controller calls through before a
//! `StreamQueue` line enters the `InflightLog` (§4.8: preprocessor adapter).
//!
//! The full G-Code preprocessor (variable expansion, arc interpolation,
//! cleanup) is an external collaborator and stays out of scope. What's
//! implemented here is the seam itself plus the one concrete transform this
//! driver owns end-to-end: a feed-rate override.

use std::collections::HashMap;

/// Result of preprocessing one raw line.
#[derive(Debug, Clone, Default)]
pub struct PreprocessResult {
    /// Zero or more lines to actually transmit, in order. Zero means the
    /// line was dropped (e.g. a pure comment); more than one means the
    /// line was expanded.
    pub lines: Vec<String>,
    /// Variable substitutions performed, reported via `on_vars_change`.
    pub vars: Option<HashMap<String, String>>,
}

impl PreprocessResult {
    fn pass_through(line: &str) -> Self {
        Self {
            lines: vec![line.to_string()],
            vars: None,
        }
    }
}

/// Transforms one `StreamQueue` line into zero or more transmittable lines.
/// Lines submitted via `send_immediately` bypass this trait entirely.
pub trait Preprocessor: Send {
    fn process(&mut self, line: &str) -> PreprocessResult;
}

/// The default: every line is transmitted unchanged.
#[derive(Debug, Default)]
pub struct PassThroughPreprocessor;

impl Preprocessor for PassThroughPreprocessor {
    fn process(&mut self, line: &str) -> PreprocessResult {
        PreprocessResult::pass_through(line)
    }
}

/// Rewrites the `F` word of a line when a feed override is active.
///
/// Enabled/disabled via [`set_feed_override`](crate::machines::grbl::Grbl::set_feed_override);
/// the override value is set via
/// [`request_feed`](crate::machines::grbl::Grbl::request_feed). Both are
/// exposed through a shared [`FeedOverrideState`] so the orchestrator can
/// mutate them without reaching inside the flow controller's boxed trait
/// object.
#[derive(Debug)]
pub struct FeedOverridePreprocessor {
    state: std::sync::Arc<parking_lot::Mutex<FeedOverrideState>>,
}

#[derive(Debug, Default)]
pub struct FeedOverrideState {
    pub enabled: bool,
    pub feed: Option<f64>,
}

impl FeedOverridePreprocessor {
    pub fn new(state: std::sync::Arc<parking_lot::Mutex<FeedOverrideState>>) -> Self {
        Self { state }
    }
}

impl Preprocessor for FeedOverridePreprocessor {
    fn process(&mut self, line: &str) -> PreprocessResult {
        let (enabled, feed) = {
            let s = self.state.lock();
            (s.enabled, s.feed)
        };
        if !enabled {
            return PreprocessResult::pass_through(line);
        }
        let Some(feed) = feed else {
            return PreprocessResult::pass_through(line);
        };
        match rewrite_feed_word(line, feed) {
            Some(rewritten) => {
                let mut vars = HashMap::new();
                vars.insert("F".to_string(), format_feed(feed));
                PreprocessResult {
                    lines: vec![rewritten],
                    vars: Some(vars),
                }
            }
            None => PreprocessResult::pass_through(line),
        }
    }
}

fn format_feed(feed: f64) -> String {
    if feed.fract() == 0.0 {
        format!("{}", feed as i64)
    } else {
        feed.to_string()
    }
}

/// Replaces the numeric value following an `F` word with `new_value`,
/// leaving the rest of the line untouched. Returns `None` if the line has
/// no `F` word (nothing to rewrite).
fn rewrite_feed_word(line: &str, new_value: f64) -> Option<String> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if (c == 'F' || c == 'f') && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric()) {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_number_char(bytes[end] as char) {
                end += 1;
            }
            if end > start {
                let mut out = String::with_capacity(line.len());
                out.push_str(&line[..start]);
                out.push_str(&format_feed(new_value));
                out.push_str(&line[end..]);
                return Some(out);
            }
        }
        i += 1;
    }
    None
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.' || c == '-' || c == '+'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_returns_line_unchanged() {
        let mut p = PassThroughPreprocessor;
        let r = p.process("G1 X10 F100");
        assert_eq!(r.lines, vec!["G1 X10 F100".to_string()]);
        assert!(r.vars.is_none());
    }

    #[test]
    fn rewrite_feed_word_replaces_value_in_place() {
        assert_eq!(
            rewrite_feed_word("F100 G1 X210", 800.0),
            Some("F800 G1 X210".to_string())
        );
        assert_eq!(
            rewrite_feed_word("G1 X10 F100 Y20", 800.0),
            Some("G1 X10 F800 Y20".to_string())
        );
    }

    #[test]
    fn rewrite_feed_word_no_f_word_returns_none() {
        assert_eq!(rewrite_feed_word("G0 X10 Y20", 800.0), None);
    }

    #[test]
    fn feed_override_preprocessor_disabled_passes_through() {
        let state = std::sync::Arc::new(parking_lot::Mutex::new(FeedOverrideState::default()));
        let mut p = FeedOverridePreprocessor::new(state);
        let r = p.process("F100 G1 X210");
        assert_eq!(r.lines, vec!["F100 G1 X210".to_string()]);
    }

    #[test]
    fn feed_override_preprocessor_enabled_rewrites_and_reports_vars() {
        let state = std::sync::Arc::new(parking_lot::Mutex::new(FeedOverrideState {
            enabled: true,
            feed: Some(800.0),
        }));
        let mut p = FeedOverridePreprocessor::new(state);
        let r = p.process("F100 G1 X210");
        assert_eq!(r.lines, vec!["F800 G1 X210".to_string()]);
        assert_eq!(r.vars.unwrap().get("F"), Some(&"800".to_string()));
    }
}
