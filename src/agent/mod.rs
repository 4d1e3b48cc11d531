//! Backend invocation boundary.
//!
//! Every backend, regardless of protocol, is reached through [`AgentInvoker`]
//! and produces the same [`Chunk`] sequence. The engine upstream never
//! inspects backend types; differences in behavior come from capability flags
//! on the agent config, not from matching on who produced the stream.

mod http;

pub use http::{HttpInvoker, HttpInvokerFactory};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::ChatHistoryEntry;
use crate::platform::AgentConfig;

// ============================================================================
// Chunks
// ============================================================================

/// One unit of backend output, already normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// A fragment of assistant text.
    Content(String),
    /// Backend metadata (execution ids, model info, usage, progress events).
    Metadata(Map<String, Value>),
    /// The backend is splitting the turn into a further assistant message.
    NewMessage(Option<Map<String, Value>>),
    /// The backend considers the turn complete. The stream may still carry
    /// trailing metadata after this.
    Done(Option<Map<String, Value>>),
    /// A backend-reported error that does not abort the stream.
    Error(String),
}

/// A mid-stream read failure. Fatal: the stream is unusable past this point.
#[derive(Debug, Error)]
#[error("stream read failed: {0}")]
pub struct ChunkReadError(pub String);

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, ChunkReadError>> + Send>>;

// ============================================================================
// Invocation
// ============================================================================

/// What the engine hands a backend for one turn.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub conversation_id: String,
    pub message: String,
    pub chat_history: Vec<ChatHistoryEntry>,
}

/// Failure to establish a backend stream. Nothing has been persisted when
/// this is returned.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid backend configuration: {0}")]
    Config(String),
}

#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Open a chunk stream for one turn.
    async fn invoke(&self, request: InvokeRequest) -> Result<ChunkStream, InvokeError>;
}

impl std::fmt::Debug for dyn AgentInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn AgentInvoker")
    }
}

/// Builds an invoker for a resolved agent config. The seam tests script.
pub trait InvokerFactory: Send + Sync {
    fn create(&self, config: &AgentConfig) -> Result<Box<dyn AgentInvoker>, InvokeError>;
}
