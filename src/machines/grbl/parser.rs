//! Response parser: classifies one inbound line per the grammar in the
//! wire-protocol section of the driver's design and emits a typed event.
//!
//! `ok`/`error:`/`ALARM:`/boot lines are stateless single-line
//! classifications. Settings (`$N=V`) and hash-state (`[PREFIX:...]`) lines
//! accumulate across a run of lines; [`ResponseParser`] holds that pending
//! accumulation and returns a secondary [`Accumulated`] event alongside the
//! per-line classification once the run completes.

use crate::machines::grbl::state::{Mode, Position, SettingEntry};
use std::collections::HashMap;

/// Coordinate-system / offset names that terminate a hash-state download.
/// `PRB` (the probe result) is always last in a `$#` dump.
const HASH_PREFIXES: &[&str] = &[
    "G54", "G55", "G56", "G57", "G58", "G59", "G28", "G30", "G92", "TLO", "PRB",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Ok,
    Error(String),
    Alarm(String),
    Boot(String),
    Status {
        mode: Mode,
        machine_position: Position,
        working_position: Position,
        feed: Option<f64>,
        bufsize: Option<usize>,
    },
    SettingLine {
        id: u32,
        value: String,
        comment: String,
    },
    HashLine {
        prefix: String,
        values: Vec<f64>,
    },
    GcodeParserState(Vec<String>),
    Unknown(String),
}

/// A second event derived from accumulated state, emitted alongside the
/// primary classification of the line that completed the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulated {
    SettingsDownloaded(HashMap<u32, SettingEntry>),
    HashStateUpdate(HashMap<String, Vec<f64>>),
}

/// Stateful line classifier. One instance lives for the lifetime of a
/// connection; it is owned exclusively by the dispatcher thread, so no
/// locking is needed around it.
#[derive(Debug, Default)]
pub struct ResponseParser {
    pending_settings: HashMap<u32, SettingEntry>,
    settings_pending: bool,
    pending_hash: HashMap<String, Vec<f64>>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_line(&mut self, line: &str) -> (ParsedLine, Option<Accumulated>) {
        let line = line.trim_end_matches(['\r', '\n']);

        if line == "ok" {
            let secondary = self.take_settings_if_pending();
            return (ParsedLine::Ok, secondary);
        }
        if let Some(code) = line.strip_prefix("error:") {
            return (ParsedLine::Error(code.to_string()), None);
        }
        if let Some(code) = line.strip_prefix("ALARM:") {
            return (ParsedLine::Alarm(code.to_string()), None);
        }
        if let Some(version) = line.strip_prefix("Grbl ") {
            self.pending_settings.clear();
            self.settings_pending = false;
            self.pending_hash.clear();
            return (ParsedLine::Boot(version.trim().to_string()), None);
        }
        if line.starts_with('<') && line.ends_with('>') {
            return (parse_status(line), None);
        }
        if let Some(setting) = parse_setting_line(line) {
            self.settings_pending = true;
            self.pending_settings.insert(
                setting.0,
                SettingEntry {
                    value: setting.1.clone(),
                    comment: setting.2.clone(),
                },
            );
            return (
                ParsedLine::SettingLine {
                    id: setting.0,
                    value: setting.1,
                    comment: setting.2,
                },
                None,
            );
        }
        if line.starts_with('[') && line.ends_with(']') {
            let inner = &line[1..line.len() - 1];
            if let Some((prefix, values)) = parse_hash_line(inner) {
                let is_terminal = prefix == "PRB";
                self.pending_hash.insert(prefix.clone(), values.clone());
                let secondary = if is_terminal {
                    Some(Accumulated::HashStateUpdate(std::mem::take(
                        &mut self.pending_hash,
                    )))
                } else {
                    None
                };
                return (ParsedLine::HashLine { prefix, values }, secondary);
            }
            return (ParsedLine::GcodeParserState(parse_parser_state(inner)), None);
        }

        (ParsedLine::Unknown(line.to_string()), None)
    }

    fn take_settings_if_pending(&mut self) -> Option<Accumulated> {
        if self.settings_pending {
            self.settings_pending = false;
            Some(Accumulated::SettingsDownloaded(std::mem::take(
                &mut self.pending_settings,
            )))
        } else {
            None
        }
    }
}

/// Parses `$N=V (comment)` into `(N, V, comment)`. Comment is optional.
fn parse_setting_line(line: &str) -> Option<(u32, String, String)> {
    let rest = line.strip_prefix('$')?;
    let eq = rest.find('=')?;
    let id: u32 = rest[..eq].parse().ok()?;
    let after_eq = &rest[eq + 1..];
    if let Some(paren_start) = after_eq.find('(') {
        let value = after_eq[..paren_start].trim().to_string();
        let comment = after_eq[paren_start + 1..]
            .trim_end_matches(')')
            .trim()
            .to_string();
        Some((id, value, comment))
    } else {
        Some((id, after_eq.trim().to_string(), String::new()))
    }
}

/// Parses the content of a `[PREFIX:f,f,f]` line (brackets already stripped).
fn parse_hash_line(inner: &str) -> Option<(String, Vec<f64>)> {
    let colon = inner.find(':')?;
    let prefix = &inner[..colon];
    if !HASH_PREFIXES.contains(&prefix) {
        return None;
    }
    let payload = &inner[colon + 1..];
    let values: Vec<f64> = payload
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            s.trim()
                .trim_end_matches(":0")
                .trim_end_matches(":1")
                .parse()
                .ok()
        })
        .collect();
    Some((prefix.to_string(), values))
}

/// Parses `G0 G54 G17 G21 G90 G94 M0 M5 M9 T0 F0 S0` (brackets already
/// stripped) into its ordered tokens. Each token begins with one of the
/// modal group letters G/M/T/F/S/P.
fn parse_parser_state(inner: &str) -> Vec<String> {
    inner
        .split_whitespace()
        .filter(|tok| {
            tok.chars()
                .next()
                .map(|c| "GMTFSPgmtfsp".contains(c))
                .unwrap_or(false)
        })
        .map(|tok| tok.to_string())
        .collect()
}

/// Parses a legacy grbl 0.9-style status report:
/// `<Idle,MPos:0.000,0.000,0.000,WPos:0.000,0.000,0.000,F:500,Bf:15,Ln:42>`.
///
/// The top-level separator is a comma, but `MPos`/`WPos` values themselves
/// contain commas, so fields can't be found with a naive `split(',')`;
/// instead we locate the byte offset of each known field prefix and slice
/// between consecutive offsets.
fn parse_status(line: &str) -> ParsedLine {
    let inner = &line[1..line.len() - 1];
    let first_comma = inner.find(',').unwrap_or(inner.len());
    let mode = parse_mode(&inner[..first_comma]);
    let rest = if first_comma < inner.len() {
        &inner[first_comma + 1..]
    } else {
        ""
    };

    let fields = split_status_fields(rest);
    let mut machine_position = Position::default();
    let mut working_position = Position::default();
    let mut feed = None;
    let mut bufsize = None;

    for (name, value) in fields {
        match name {
            "MPos" => machine_position = parse_position(value),
            "WPos" => working_position = parse_position(value),
            "F" => feed = value.trim().parse().ok(),
            "Bf" => bufsize = value.split(',').next().and_then(|s| s.trim().parse().ok()),
            _ => {}
        }
    }

    ParsedLine::Status {
        mode,
        machine_position,
        working_position,
        feed,
        bufsize,
    }
}

const STATUS_FIELD_PREFIXES: &[&str] = &["MPos:", "WPos:", "F:", "Bf:", "Ln:"];

fn split_status_fields(rest: &str) -> Vec<(&str, &str)> {
    let mut marks: Vec<(usize, &str)> = Vec::new();
    for &prefix in STATUS_FIELD_PREFIXES {
        let mut start = 0;
        while let Some(i) = rest[start..].find(prefix) {
            let abs = start + i;
            marks.push((abs, prefix));
            start = abs + prefix.len();
        }
    }
    marks.sort_by_key(|&(pos, _)| pos);

    let mut fields = Vec::with_capacity(marks.len());
    for (idx, &(pos, prefix)) in marks.iter().enumerate() {
        let value_start = pos + prefix.len();
        let value_end = marks.get(idx + 1).map(|&(p, _)| p).unwrap_or(rest.len());
        let value = rest[value_start..value_end].trim().trim_end_matches(',');
        fields.push((prefix.trim_end_matches(':'), value));
    }
    fields
}

fn parse_position(value: &str) -> Position {
    let mut parts = value.split(',').filter(|s| !s.is_empty());
    let x = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0.0);
    let y = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0.0);
    let z = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0.0);
    Position { x, y, z }
}

fn parse_mode(token: &str) -> Mode {
    let head = token.split(':').next().unwrap_or(token).trim();
    match head {
        "Idle" => Mode::Idle,
        "Run" | "Jog" => Mode::Run,
        "Hold" | "Door" => Mode::Hold,
        "Queue" => Mode::Queue,
        "Alarm" => Mode::Alarm,
        "Check" => Mode::Check,
        "Home" | "Sleep" => Mode::Home,
        _ => Mode::Idle,
    }
}
