//! Line-oriented event framing for `text/event-stream` bodies.
//!
//! The server emits one JSON document per event:
//!
//! ```text
//! data: {"device_id":"esp32-01","humidity":61.5,...}
//!
//! ```
//!
//! [`FrameParser`] turns arbitrarily split byte chunks back into those
//! payload strings. [`decode_status`] turns a payload into a
//! [`DeviceStatus`].

use crate::error::Error;
use crate::models::DeviceStatus;

const DATA_FIELD: &str = "data:";

/// Incremental parser for `data: <payload>\n\n` frames.
///
/// Bound to a single connection: incomplete lines, a pending payload and a
/// split UTF-8 sequence are all carried over between chunks. Create a new
/// parser for every new connection.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Text received after the last newline.
    partial_line: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    partial_utf8: Vec<u8>,
    /// Payload captured from a `data:` line, waiting for its blank line.
    pending: Option<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every payload the chunk completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode_utf8(chunk);
        self.feed_str(&text)
    }

    /// Feed already-decoded text, returning every payload it completed.
    pub fn feed_str(&mut self, chunk: &str) -> Vec<String> {
        self.partial_line.push_str(chunk);

        let Some(last_newline) = self.partial_line.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.partial_line.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial_line, rest);

        let mut payloads = Vec::new();
        let lines = complete.strip_suffix('\n').unwrap_or(&complete);
        for line in lines.split('\n') {
            self.process_line(line, &mut payloads);
        }
        payloads
    }

    /// Whether the parser holds data that has not been emitted yet.
    pub fn has_buffered(&self) -> bool {
        !self.partial_line.is_empty() || !self.partial_utf8.is_empty() || self.pending.is_some()
    }

    fn process_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        let line = line.trim();

        if let Some(value) = line.strip_prefix(DATA_FIELD) {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.pending = Some(value.to_owned());
        } else if line.is_empty() {
            if let Some(payload) = self.pending.take() {
                payloads.push(payload);
            }
        }
        // Comments (`: keepalive`), `event:`, `id:` and `retry:` lines are ignored.
    }

    /// Decode as much of `chunk` as forms complete UTF-8, holding back a
    /// sequence that was split across chunks.
    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.partial_utf8);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // `valid_up_to` guarantees this prefix is UTF-8.
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.partial_utf8 = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Decode one event payload into a [`DeviceStatus`].
pub fn decode_status(payload: &str) -> Result<DeviceStatus, Error> {
    serde_json::from_str(payload).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: payload.to_owned(),
    })
}
