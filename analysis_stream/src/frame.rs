//! Frame-delimited text stream parsing.
//!
//! A frame is a block of `field: value` lines terminated by a blank line:
//!
//! ```text
//! event: token
//! data: {"text": "Hello "}
//!
//! ```
//!
//! Chunks may split a frame (or a UTF-8 sequence) anywhere; the parser keeps the
//! unterminated tail until more bytes arrive or the stream ends.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

/// Event name used when a frame has no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One decoded frame: an event name and its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub payload: Value,
}

/// A single frame could not be decoded. The stream itself is unaffected.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame '{event}' payload is not valid JSON: {source}")]
    Json {
        event: String,
        data: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("frame is not valid UTF-8: {source}")]
    Utf8 {
        #[source]
        source: std::str::Utf8Error,
    },
}

pub type FrameResult = Result<Frame, FrameError>;

#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    // bytes before this offset are known not to start a frame boundary
    scan_from: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<FrameResult> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some((end, delim)) = find_boundary(&self.buf, self.scan_from) {
            let block: Vec<u8> = self.buf.drain(..end + delim).collect();
            self.scan_from = 0;
            if let Some(frame) = parse_block(&block[..end]) {
                out.push(frame);
            }
        }
        // a boundary is at most 3 bytes, so rescan the tail next time
        self.scan_from = self.buf.len().saturating_sub(2);
        out
    }

    /// Flushes whatever is left once the underlying stream has closed.
    ///
    /// A trailing frame without its blank line is still delivered.
    pub fn finish(&mut self) -> Option<FrameResult> {
        self.scan_from = 0;
        let rest = std::mem::take(&mut self.buf);
        parse_block(&rest)
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Finds the first blank line (`\n\n` or `\n\r\n`) at or after `from`.
///
/// Returns the block length and the delimiter length.
fn find_boundary(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match (buf.get(i + 1), buf.get(i + 2)) {
                (Some(b'\n'), _) => return Some((i, 2)),
                (Some(b'\r'), Some(b'\n')) => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn parse_block(block: &[u8]) -> Option<FrameResult> {
    let text = match std::str::from_utf8(block) {
        Ok(text) => text,
        Err(source) => return Some(Err(FrameError::Utf8 { source })),
    };

    let mut event: Option<&str> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.trim_end()),
            "data" => data.push(value),
            "id" | "retry" => {}
            other => trace!(field = other, "ignoring unknown frame field"),
        }
    }

    // comment-only or keep-alive block
    if event.is_none() && data.is_empty() {
        return None;
    }

    let event = match event {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_EVENT.to_string(),
    };

    if data.is_empty() {
        return Some(Ok(Frame {
            event,
            payload: Value::Object(Map::new()),
        }));
    }

    let joined = data.join("\n");
    Some(match serde_json::from_str::<Value>(&joined) {
        Ok(payload) => Ok(Frame { event, payload }),
        Err(source) => Err(FrameError::Json {
            event,
            data: joined,
            source,
        }),
    })
}
