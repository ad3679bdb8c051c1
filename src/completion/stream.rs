//! Incremental decoding of streamed completion responses
//!
//! The endpoint sends newline-delimited `data: {json}` frames and finishes
//! with `data: [DONE]`. Bytes are buffered until a full line is available so
//! multi-byte characters split across network reads decode correctly.

use serde::Deserialize;

/// Terminal frame payload
const DONE_SENTINEL: &str = "[DONE]";

/// Something decoded from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text
    Delta(String),
    /// Termination sentinel seen
    Done,
    /// A frame could not be parsed; nothing further is decoded
    Malformed(String),
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Option<Vec<ChunkChoice>>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Line-oriented decoder for `data:` frames
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl StreamDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `Done` or `Malformed` has been produced
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw bytes, returning events for every complete line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decode_line(&line[..line.len() - 1]) {
                events.push(event);
                if self.finished {
                    self.buffer.clear();
                    break;
                }
            }
        }

        events
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished || self.buffer.is_empty() {
            return Vec::new();
        }

        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        let Ok(line) = std::str::from_utf8(raw) else {
            self.finished = true;
            return Some(StreamEvent::Malformed("frame is not valid UTF-8".to_string()));
        };

        let event = decode_frame(line.trim_end_matches('\r'))?;
        if !matches!(event, StreamEvent::Delta(_)) {
            self.finished = true;
        }
        Some(event)
    }
}

/// Decode a single line; non-`data:` lines are ignored
fn decode_frame(line: &str) -> Option<StreamEvent> {
    let data = line.strip_prefix("data:")?.trim();

    if data == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    match serde_json::from_str::<ChunkPayload>(data) {
        Ok(payload) => payload
            .choices?
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|text| !text.is_empty())
            .map(StreamEvent::Delta),
        Err(e) => Some(StreamEvent::Malformed(format!("{e}: {data}"))),
    }
}
