//! Event decoder
//!
//! Turns an incrementally delivered byte stream into `(event, data)` records.
//! Each record is an `event:` line naming it, followed by a `data:` line with
//! its JSON payload. Chunks may split lines (and UTF-8 sequences) anywhere;
//! unterminated bytes are kept until the next chunk.

use serde_json::Value;
use tracing::{debug, warn};

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// Longest line kept while waiting for its terminator. Longer lines are
/// dropped whole.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    pending_name: Option<String>,
    /// Inside an overlong line; discard up to the next newline.
    skipping_line: bool,
    dropped: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        // Buffered bytes never contain a newline, so only the new chunk is scanned.
        let mut search_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let line_end = search_from + offset;
            let line = String::from_utf8_lossy(&self.buffer[line_start..line_end]).into_owned();
            line_start = line_end + 1;
            search_from = line_start;

            if self.skipping_line {
                self.skipping_line = false;
                continue;
            }

            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        self.buffer.drain(..line_start);

        if self.buffer.len() > MAX_LINE_BYTES {
            if !self.skipping_line {
                warn!(bytes = self.buffer.len(), "Dropping overlong stream line");
                self.dropped += 1;
                self.pending_name = None;
                self.skipping_line = true;
            }
            self.buffer.clear();
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<RawEvent> {
        if line.is_empty() {
            return None;
        }

        if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
            self.pending_name = Some(name.trim().to_string());
            return None;
        }

        let payload = line.strip_prefix(DATA_PREFIX)?;
        let Some(name) = self.pending_name.take() else {
            debug!("Dropping data line without a preceding event name");
            self.dropped += 1;
            return None;
        };

        match serde_json::from_str::<Value>(payload.trim()) {
            Ok(data) => Some(RawEvent { name, data }),
            Err(e) => {
                warn!(event = %name, "Dropping malformed event payload: {}", e);
                self.dropped += 1;
                None
            }
        }
    }

    /// Signal end of stream. Any unterminated trailing line is discarded;
    /// returns how many bytes were lost.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len();
        if discarded > 0 {
            warn!(bytes = discarded, "Discarding unterminated trailing line at stream end");
        }
        self.buffer.clear();
        self.pending_name = None;
        self.skipping_line = false;
        discarded
    }

    /// Number of lines dropped so far (malformed, unnamed or overlong).
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
