//! Client-side SSE event assembly.
//!
//! Adapts a raw byte stream (a `reqwest` response body) into assembled SSE
//! events: buffering, UTF-8 conversion, line splitting for both `\n` and
//! `\r\n`, and multi-line `data:` accumulation until the blank-line event
//! boundary. Backends attach their JSON payloads to the `data` field; decoding
//! those is the invoker's job.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

/// An assembled SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    /// Joined `data:` lines.
    pub data: String,
    /// The `event:` field, when present.
    pub event: Option<String>,
}

#[derive(Default)]
struct EventBuilder {
    data_lines: Vec<String>,
    event: Option<String>,
}

impl EventBuilder {
    /// Feed one line; returns a finished event at an event boundary.
    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data_lines.is_empty() && self.event.is_none() {
                return None;
            }
            return Some(self.take());
        }
        if let Some(data) = field_value(line, "data:") {
            self.data_lines.push(data.to_string());
        } else if let Some(event) = field_value(line, "event:") {
            self.event = Some(event.to_string());
        }
        // id:, retry:, comments and unknown fields are ignored.
        None
    }

    fn take(&mut self) -> SseEvent {
        SseEvent {
            data: std::mem::take(&mut self.data_lines).join("\n"),
            event: self.event.take(),
        }
    }

    fn has_content(&self) -> bool {
        !self.data_lines.is_empty() || self.event.is_some()
    }
}

fn field_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(prefix)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Stream adapter yielding assembled [`SseEvent`]s from a byte stream.
pub struct SseEventStream<S> {
    inner: S,
    buffer: String,
    builder: EventBuilder,
    done: bool,
}

impl<S> SseEventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: String::new(),
            builder: EventBuilder::default(),
            done: false,
        }
    }

    /// Pop the next complete line out of the buffer.
    fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.find('\n')?;
        let mut line: String = self.buffer.drain(..=end).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

impl<S, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            while let Some(line) = self.next_line() {
                if let Some(event) = self.builder.push_line(&line) {
                    return Poll::Ready(Some(Ok(event)));
                }
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        self.buffer.push_str(text);
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    self.done = true;
                    // Flush a final unterminated line and any pending event.
                    if !self.buffer.is_empty() {
                        let line = std::mem::take(&mut self.buffer);
                        if let Some(event) = self.builder.push_line(&line) {
                            return Poll::Ready(Some(Ok(event)));
                        }
                    }
                    if self.builder.has_content() {
                        return Poll::Ready(Some(Ok(self.builder.take())));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
