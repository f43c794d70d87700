//! Incremental decoder for the assistant's Server-Sent-Events stream.
//!
//! Bytes are buffered across chunk boundaries and split on `\n`; only
//! complete lines are decoded, so the frames produced never depend on how
//! the transport happened to chunk the body.

use crate::constants::{COMMENT_PREFIX, DATA_DONE_MARKER, DATA_PREFIX, DONE_MARKER, MAX_LINE_BYTES};
use crate::str_utils::log_snippet;
use serde_json::Value;

/// A classified server event. Terminal kinds carry the whole JSON object
/// so the normalizer can probe it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Thinking {
        message: String,
        session_id: Option<String>,
    },
    ToolStart {
        tool: String,
        status: String,
        session_id: Option<String>,
    },
    Response(Value),
    RawProducts(Value),
    RawCart(Value),
    Data(Value),
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolStart { .. } => "tool_start",
            Self::Response(_) => "response",
            Self::RawProducts(_) => "raw_products",
            Self::RawCart(_) => "raw_cart",
            Self::Data(_) => "data",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Thinking { session_id, .. } | Self::ToolStart { session_id, .. } => {
                session_id.as_deref()
            }
            Self::Response(v) | Self::RawProducts(v) | Self::RawCart(v) | Self::Data(v) => {
                v.get("session_id").and_then(|s| s.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Event(StreamEvent),
    Done,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LineKind<'a> {
    Skip,
    Done,
    Data(&'a str),
    Other,
}

pub fn classify_line(raw: &str) -> LineKind<'_> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with(COMMENT_PREFIX) {
        return LineKind::Skip;
    }
    if line == DONE_MARKER || line == DATA_DONE_MARKER {
        return LineKind::Done;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => LineKind::Data(rest.trim()),
        None => LineKind::Other,
    }
}

/// Result of decoding one `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Event(StreamEvent),
    /// Valid JSON without a type this client handles.
    Ignored,
    /// Not JSON. Logged and counted by the decoder.
    Malformed,
}

pub fn parse_event(json_str: &str) -> Parsed {
    let data: Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                "Failed to parse SSE data: {} ({})",
                log_snippet(json_str),
                e
            );
            return Parsed::Malformed;
        }
    };

    match event_from_value(data) {
        Some(event) => Parsed::Event(event),
        None => Parsed::Ignored,
    }
}

/// Classifies an already-parsed frame by its `type` tag.
pub fn event_from_value(data: Value) -> Option<StreamEvent> {
    let kind = match data.get("type").and_then(|t| t.as_str()) {
        Some(k) => k.to_string(),
        None => {
            tracing::debug!("[SSE] Frame without type: {}", log_snippet(&data.to_string()));
            return None;
        }
    };

    let session_id = data
        .get("session_id")
        .and_then(|s| s.as_str())
        .map(str::to_string);
    let text = |key: &str| match data.get(key).and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => String::new(),
    };

    let event = match kind.as_str() {
        "thinking" => StreamEvent::Thinking {
            message: text("message"),
            session_id,
        },
        "tool_start" => StreamEvent::ToolStart {
            tool: text("tool"),
            status: text("status"),
            session_id,
        },
        "response" => StreamEvent::Response(data),
        "raw_products" => StreamEvent::RawProducts(data),
        "raw_cart" => StreamEvent::RawCart(data),
        "data" => StreamEvent::Data(data),
        other => {
            tracing::debug!("[SSE] Ignoring event type {:?}", other);
            return None;
        }
    };
    Some(event)
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    discarding: bool,
    finished: bool,
    pub malformed_lines: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one transport chunk. Returns every frame completed by it; after
    /// `SseFrame::Done` the decoder ignores further input. Lines longer than
    /// `MAX_LINE_BYTES` are dropped whether or not they span chunks.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(rel) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + rel;
            if self.discarding {
                self.discarding = false;
            } else if end - start > MAX_LINE_BYTES {
                tracing::warn!("[SSE] Discarding line over {} bytes", MAX_LINE_BYTES);
            } else {
                let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
                if let Some(frame) = self.decode_line(&line) {
                    let done = frame == SseFrame::Done;
                    frames.push(frame);
                    if done {
                        self.finished = true;
                        self.buffer.clear();
                        self.scanned = 0;
                        return frames;
                    }
                }
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            if !self.discarding {
                tracing::warn!("[SSE] Discarding line over {} bytes", MAX_LINE_BYTES);
            }
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        frames
    }

    /// Flushes an unterminated trailing line at end of body.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let rest = std::mem::take(&mut self.buffer);
        if self.discarding || rest.is_empty() {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&rest).into_owned();
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, line: &str) -> Option<SseFrame> {
        match classify_line(line) {
            LineKind::Skip | LineKind::Other => None,
            LineKind::Done => Some(SseFrame::Done),
            LineKind::Data(json) => match parse_event(json) {
                Parsed::Event(ev) => Some(SseFrame::Event(ev)),
                Parsed::Ignored => None,
                Parsed::Malformed => {
                    self.malformed_lines += 1;
                    None
                }
            },
        }
    }
}

/// Decodes a complete body delivered as `chunks`, flushing at the end.
pub fn decode_chunks<I, C>(chunks: I) -> Vec<SseFrame>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut decoder = SseDecoder::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        frames.extend(decoder.feed(chunk.as_ref()));
        if decoder.is_finished() {
            return frames;
        }
    }
    frames.extend(decoder.finish());
    frames
}
