//! Frame decoder for the generation stream.
//!
//! The send endpoint answers with newline-delimited frames:
//!
//! ```text
//! data: {"content":"Hi"}
//! data: {"content":" there"}
//! data: {"done":true}
//! ```
//!
//! Chunks from the response body are fed in as raw bytes. Lines may straddle
//! chunk boundaries (including inside a multi-byte character), so the decoder
//! keeps unterminated bytes until the next chunk. A decoder instance belongs
//! to exactly one request.

use tracing::debug;

use crate::chat::error::DecodeError;
use crate::chat::types::StreamPayload;

/// Prefix marking a payload line.
const FRAME_PREFIX: &[u8] = b"data:";

/// Ceiling for a single unterminated line.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One decoded event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamFrame {
    /// A content delta to append.
    Delta(String),
    /// The reply is complete.
    Done,
}

/// Incremental decoder for one response body.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending: Option<StreamFrame>,
    skipped: usize,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and iterate over the frames it completes.
    ///
    /// The iterator is lazy: lines are parsed as it is advanced. Frames that
    /// are not consumed stay buffered and are produced by the next call.
    pub fn decode<'a>(&'a mut self, chunk: &[u8]) -> DecodedFrames<'a> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > MAX_LINE_BYTES && !self.buffer.contains(&b'\n') {
            let err = DecodeError::LineTooLong(MAX_LINE_BYTES);
            debug!(%err, "discarding oversized frame line");
            self.buffer.clear();
            self.skipped += 1;
        }
        DecodedFrames {
            decoder: self,
            flush: false,
        }
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> DecodedFrames<'_> {
        DecodedFrames {
            decoder: self,
            flush: true,
        }
    }

    /// Number of lines dropped as malformed so far.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Forget buffered bytes and counters.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
        self.skipped = 0;
    }

    fn next_line(&mut self, flush: bool) -> Option<Vec<u8>> {
        if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            return Some(line);
        }
        if flush && !self.buffer.is_empty() {
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    fn next_frame(&mut self, flush: bool) -> Option<StreamFrame> {
        if let Some(frame) = self.pending.take() {
            return Some(frame);
        }

        while let Some(line) = self.next_line(flush) {
            match parse_line(&line) {
                Ok(Some(payload)) => {
                    let delta = payload
                        .content
                        .filter(|c| !c.is_empty())
                        .map(StreamFrame::Delta);
                    let done = payload.done.unwrap_or(false).then_some(StreamFrame::Done);
                    match (delta, done) {
                        (Some(delta), done) => {
                            self.pending = done;
                            return Some(delta);
                        }
                        (None, Some(done)) => return Some(done),
                        (None, None) => {}
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.skipped += 1;
                    debug!(%err, "skipping malformed frame");
                }
            }
        }

        None
    }
}

/// Lazy iterator over frames completed by the latest chunk.
pub struct DecodedFrames<'a> {
    decoder: &'a mut FrameDecoder,
    flush: bool,
}

impl Iterator for DecodedFrames<'_> {
    type Item = StreamFrame;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame(self.flush)
    }
}

/// Parse one line. `Ok(None)` for blank lines and lines without the prefix.
fn parse_line(line: &[u8]) -> Result<Option<StreamPayload>, DecodeError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let Some(rest) = line.strip_prefix(FRAME_PREFIX) else {
        return Ok(None);
    };
    let rest = rest.strip_prefix(b" ").unwrap_or(rest);
    let payload = serde_json::from_slice::<StreamPayload>(rest)?;
    Ok(Some(payload))
}
