//! Query strings and real-time bytes of the host→device wire protocol.
//!
//! Line-based queries are plain strings sent through the flow controller's
//! priority queue (they bypass the stream preprocessor but still obey the
//! receive-buffer bound). Real-time bytes bypass both queues entirely and
//! never count against the buffer-fill accounting (invariant P4).

/// The `$$`/`$#`/`$G` line-based queries. These enter the priority queue
/// like any `send_immediately` line, so `Display` gives the exact wire text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrblQuery {
    /// Request all settings (`$$`).
    Settings,
    /// Request the coordinate-system / offset table (`$#`).
    HashState,
    /// Request the current modal parser state (`$G`).
    GcodeParserState,
}

impl std::fmt::Display for GrblQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GrblQuery::Settings => "$$",
            GrblQuery::HashState => "$#",
            GrblQuery::GcodeParserState => "$G",
        };
        write!(f, "{s}")
    }
}

/// Single-byte real-time commands. Never buffered, never counted against
/// the receive-buffer capacity; the transport writes these with priority
/// over queued lines but still serializes through the write mutex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RealtimeByte {
    /// `?` — request an immediate status report.
    StatusQuery,
    /// `!` — feed hold (pause).
    FeedHold,
    /// `~` — cycle start / resume.
    CycleStart,
    /// `\x18` (Ctrl-X) — soft reset.
    SoftReset,
}

impl RealtimeByte {
    pub fn as_byte(self) -> u8 {
        match self {
            RealtimeByte::StatusQuery => b'?',
            RealtimeByte::FeedHold => b'!',
            RealtimeByte::CycleStart => b'~',
            RealtimeByte::SoftReset => 0x18,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_display_matches_wire_text() {
        assert_eq!(GrblQuery::Settings.to_string(), "$$");
        assert_eq!(GrblQuery::HashState.to_string(), "$#");
        assert_eq!(GrblQuery::GcodeParserState.to_string(), "$G");
    }

    #[test]
    fn realtime_bytes_match_protocol() {
        assert_eq!(RealtimeByte::StatusQuery.as_byte(), b'?');
        assert_eq!(RealtimeByte::FeedHold.as_byte(), b'!');
        assert_eq!(RealtimeByte::CycleStart.as_byte(), b'~');
        assert_eq!(RealtimeByte::SoftReset.as_byte(), 0x18);
    }
}
