//! Incremental decoder for the assistant's `event:`/`data:` stream.
//!
//! Bytes may arrive in any chunking. The decoder holds back an incomplete
//! UTF-8 sequence and the trailing partial line until the next chunk, and
//! only emits a frame once both its `event:` and `data:` lines are complete.

use serde_json::Value;

/// One complete `event:`/`data:` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub data: Value,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    // Undecoded tail of a multi-byte sequence split across chunks.
    pending_bytes: Vec<u8>,
    buffer: String,
    pending_event: String,
    dropped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the frames it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.decode_utf8(chunk);

        let mut frames = Vec::new();
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return frames;
        };

        let complete: String = self.buffer.drain(..=last_newline).collect();
        for line in complete.split('\n') {
            self.scan_line(line.strip_suffix('\r').unwrap_or(line), &mut frames);
        }
        frames
    }

    /// Ends the stream. Anything still buffered is an incomplete frame and
    /// is discarded.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() || !self.pending_bytes.is_empty() {
            tracing::debug!(
                buffered = self.buffer.len() + self.pending_bytes.len(),
                "discarding incomplete trailing frame"
            );
        }
        self.buffer.clear();
        self.pending_bytes.clear();
        self.pending_event.clear();
    }

    /// Number of `data:` lines dropped because their payload was not JSON.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);

        let mut start = 0;
        while start < self.pending_bytes.len() {
            match std::str::from_utf8(&self.pending_bytes[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    start = self.pending_bytes.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending_bytes[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending_bytes.drain(..start);
    }

    fn scan_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        if let Some(event) = field_value(line, "event") {
            self.pending_event = event.trim().to_string();
            return;
        }

        let Some(data) = field_value(line, "data") else {
            return;
        };
        if self.pending_event.is_empty() {
            return;
        }

        let event = std::mem::take(&mut self.pending_event);
        match serde_json::from_str::<Value>(data) {
            Ok(data) => frames.push(Frame { event, data }),
            Err(err) => {
                self.dropped += 1;
                tracing::debug!(event = %event, error = %err, "dropping malformed frame");
            }
        }
    }
}

fn field_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
