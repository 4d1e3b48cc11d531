//! Client-facing stream transport.
//!
//! The engine emits typed, ordered [`StreamSignal`]s; this module carries
//! them over a channel to the HTTP layer and encodes them as SSE events.
//! The wire payload is a JSON envelope on an SSE `message` event:
//!
//! ```text
//! {"type": "STREAM_START" | "TEXT_STREAM" | "STREAM_NEW_MESSAGE"
//!        | "STREAM_END" | "ERROR",
//!  "content"?: string, "config"?: object}
//! ```
//!
//! A valid signal sequence is always
//! `Start (Text | NewMessage | Error)* End` and `End` is sent exactly once.

use axum::response::sse::Event;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// Signals
// ============================================================================

/// A typed stream signal, ordered as emitted by the turn engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// First signal of every stream. Tells the client which ids were assigned.
    Start {
        message_id: String,
        conversation_id: String,
    },
    /// A fragment of assistant text.
    Text { content: String },
    /// Subsequent text belongs to a new assistant message.
    NewMessage,
    /// A mid-stream error. Not necessarily terminal.
    Error {
        code: String,
        message: String,
        detail: String,
    },
    /// Last signal of every stream, even after errors.
    End,
}

/// The receiving side of the stream is gone (client disconnected).
#[derive(Debug, Error)]
#[error("signal sink closed")]
pub struct SinkClosed;

/// Where the turn engine writes its signals.
///
/// `send` is async so channel backpressure slows the producer instead of
/// dropping signals. A `SinkClosed` result means the client went away; the
/// caller cancels the backend read and finalizes normally.
#[async_trait::async_trait]
pub trait SignalSink: Send + Sync {
    async fn send(&self, signal: StreamSignal) -> Result<(), SinkClosed>;
}

/// Sink backed by a bounded channel to the HTTP response task.
pub struct ChannelSink {
    tx: mpsc::Sender<StreamSignal>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StreamSignal>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl SignalSink for ChannelSink {
    async fn send(&self, signal: StreamSignal) -> Result<(), SinkClosed> {
        self.tx.send(signal).await.map_err(|_| SinkClosed)
    }
}

// ============================================================================
// Wire encoding
// ============================================================================

#[derive(Debug, Serialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<serde_json::Value>,
}

impl Envelope {
    fn bare(kind: &'static str) -> Self {
        Self {
            kind,
            content: None,
            config: None,
        }
    }
}

fn signal_envelope(signal: &StreamSignal) -> Envelope {
    match signal {
        StreamSignal::Start {
            message_id,
            conversation_id,
        } => Envelope {
            config: Some(json!({
                "messageId": message_id,
                "conversationId": conversation_id,
            })),
            ..Envelope::bare("STREAM_START")
        },
        StreamSignal::Text { content } => Envelope {
            content: Some(content.clone()),
            ..Envelope::bare("TEXT_STREAM")
        },
        StreamSignal::NewMessage => Envelope::bare("STREAM_NEW_MESSAGE"),
        StreamSignal::Error {
            code,
            message,
            detail,
        } => Envelope {
            config: Some(json!({
                "code": code,
                "message": message,
                "details": detail,
            })),
            ..Envelope::bare("ERROR")
        },
        StreamSignal::End => Envelope::bare("STREAM_END"),
    }
}

/// Encode one signal as the SSE event the client receives.
pub fn signal_to_event(signal: &StreamSignal) -> Event {
    let envelope = signal_envelope(signal);
    let event = Event::default().event("message");
    match event.json_data(&envelope) {
        Ok(event) => event,
        // Envelope serialization cannot fail; keep the stream alive if it
        // somehow does.
        Err(_) => Event::default().event("message").data("{}"),
    }
}

// ============================================================================
// Test support
// ============================================================================
