//! SSE wire format support
//!
//! Line-oriented decoding of upstream `data: <json>` streams and encoding of
//! the frames we send back to callers. The scanner keeps one reusable buffer
//! so a `data:` line split across read chunks is reassembled instead of
//! dropped, and non-`data:` lines (blanks, comments, `event:` headers) are
//! ignored.

use bytes::{Buf, BytesMut};
use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Initial capacity of the scanner's line buffer
const SCAN_BUF_CAPACITY: usize = 4096;
/// Buffers grown past this are shrunk back after the oversized event
const SCAN_BUF_RETAIN: usize = 64 * 1024;

/// Terminal frame of the OpenAI SSE dialect
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// One decoded payload from an SSE line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsePayload {
    /// The JSON text after `data: `
    Data(String),
    /// The literal `[DONE]` marker
    Done,
}

/// Incremental line scanner over raw response bytes.
///
/// Bytes are pushed as they arrive; complete lines are popped as they become
/// available. The internal buffer is reused across events.
#[derive(Debug, Default)]
pub struct SseLineScanner {
    buf: BytesMut,
}

impl SseLineScanner {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(SCAN_BUF_CAPACITY),
        }
    }

    /// Append a chunk of raw bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(pos + 1);
        let mut line = &line[..pos];
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }
        let text = String::from_utf8_lossy(line).into_owned();
        if self.buf.capacity() > SCAN_BUF_RETAIN && self.buf.is_empty() {
            self.buf = BytesMut::with_capacity(SCAN_BUF_CAPACITY);
        }
        Some(text)
    }

    /// Drain whatever is left after the upstream closed without a newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split_to(self.buf.remaining());
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Classify one line of an SSE stream.
///
/// Returns `None` for everything that is not a `data:` line.
pub fn parse_line(line: &str) -> Option<SsePayload> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == "[DONE]" {
        Some(SsePayload::Done)
    } else {
        Some(SsePayload::Data(data.to_string()))
    }
}

pin_project! {
    /// Stream adapter turning raw upstream bytes into `data:` payloads.
    ///
    /// The stream ends on `[DONE]` or when the upstream closes; transport
    /// errors are forwarded so the caller can still finalize usage.
    pub struct SseDecoder<S> {
        #[pin]
        inner: S,
        scanner: SseLineScanner,
        finished: bool,
    }
}

impl<S> SseDecoder<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            scanner: SseLineScanner::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseDecoder<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>>,
    E: std::fmt::Display,
{
    type Item = Result<String, crate::utils::error::RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        loop {
            // Drain buffered lines before pulling more bytes.
            while let Some(line) = this.scanner.next_line() {
                match parse_line(&line) {
                    Some(SsePayload::Done) => {
                        debug!("SSE stream terminated by [DONE]");
                        *this.finished = true;
                        return Poll::Ready(None);
                    }
                    Some(SsePayload::Data(data)) => return Poll::Ready(Some(Ok(data))),
                    None => continue,
                }
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.scanner.push(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(
                        crate::utils::error::RelayError::BadResponse(format!(
                            "stream read error: {}",
                            e
                        )),
                    )));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    // A final line without a trailing newline still counts.
                    if let Some(rest) = this.scanner.take_remainder() {
                        if let Some(SsePayload::Data(data)) = parse_line(&rest) {
                            return Poll::Ready(Some(Ok(data)));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Frame a JSON payload in the OpenAI SSE dialect.
pub fn encode_data(payload: &serde_json::Value) -> String {
    format!("data: {}\n\n", payload)
}

/// Frame a typed event in the Anthropic SSE dialect.
pub fn encode_typed_event(event: &str, payload: &serde_json::Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, payload)
}
