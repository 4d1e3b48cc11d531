//! HTTP/SSE backend invoker.
//!
//! Speaks to backends that expose a chat endpoint returning an SSE body.
//! Each SSE event carries a JSON payload with a `type` discriminator
//! (`content`, `metadata`, `new_message`, `done`, `error`); everything is
//! normalized into [`Chunk`]s before the engine sees it.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{AgentInvoker, Chunk, ChunkReadError, ChunkStream, InvokeError, InvokeRequest,
            InvokerFactory};
use crate::platform::AgentConfig;
use crate::sse_codec::SseEventStream;

pub struct HttpInvoker {
    chat_url: String,
    chat_token: Option<String>,
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(chat_url: impl Into<String>, chat_token: Option<String>) -> Self {
        Self {
            chat_url: chat_url.into(),
            chat_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AgentInvoker for HttpInvoker {
    async fn invoke(&self, request: InvokeRequest) -> Result<ChunkStream, InvokeError> {
        let body = serde_json::json!({
            "conversationId": request.conversation_id,
            "message": request.message,
            "chatHistory": request.chat_history,
        });

        let mut http_request = self
            .client
            .post(&self.chat_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(token) = &self.chat_token {
            http_request = http_request.bearer_auth(token);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| InvokeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(url = %self.chat_url, "backend stream established");

        let events = SseEventStream::new(response.bytes_stream());
        let chunks = events.filter_map(|result| async move {
            match result {
                Ok(event) => parse_chunk(&event.data).map(Ok),
                Err(e) => Some(Err(ChunkReadError(e.to_string()))),
            }
        });
        Ok(Box::pin(chunks))
    }
}

/// Decode one SSE data payload into a chunk. Unparseable payloads are
/// dropped with a warning rather than aborting the stream.
fn parse_chunk(data: &str) -> Option<Chunk> {
    if data.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "dropping unparseable backend chunk");
            return None;
        }
    };
    let Value::Object(map) = value else {
        warn!("dropping non-object backend chunk");
        return None;
    };

    match map.get("type").and_then(Value::as_str) {
        Some("content") => {
            let content = map
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(Chunk::Content(content))
        }
        Some("new_message") => Some(Chunk::NewMessage(object_field(&map, "metadata"))),
        Some("done") => Some(Chunk::Done(object_field(&map, "metadata"))),
        Some("error") => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("backend error")
                .to_string();
            Some(Chunk::Error(message))
        }
        // "metadata" and any unrecognized typed payload flow through as
        // metadata so new backend fields degrade gracefully.
        _ => Some(Chunk::Metadata(map)),
    }
}

fn object_field(map: &Map<String, Value>, key: &str) -> Option<Map<String, Value>> {
    match map.get(key) {
        Some(Value::Object(inner)) => Some(inner.clone()),
        _ => None,
    }
}

/// Builds [`HttpInvoker`]s from agent configs.
#[derive(Debug, Default)]
pub struct HttpInvokerFactory;

impl InvokerFactory for HttpInvokerFactory {
    fn create(&self, config: &AgentConfig) -> Result<Box<dyn AgentInvoker>, InvokeError> {
        let url = config.settings.chat_url.trim();
        if url.is_empty() {
            return Err(InvokeError::Config(format!(
                "agent config for application {} has no chat url",
                config.application_id
            )));
        }
        Ok(Box::new(HttpInvoker::new(
            url,
            config.settings.chat_token.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_chunk() {
        let chunk = parse_chunk(r#"{"type":"content","content":"hello"}"#).unwrap();
        assert_eq!(chunk, Chunk::Content("hello".to_string()));
    }

    #[test]
    fn parses_done_with_metadata() {
        let chunk =
            parse_chunk(r#"{"type":"done","metadata":{"execution_id":"exec_1"}}"#).unwrap();
        match chunk {
            Chunk::Done(Some(meta)) => assert_eq!(meta["execution_id"], "exec_1"),
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn parses_new_message_without_metadata() {
        let chunk = parse_chunk(r#"{"type":"new_message"}"#).unwrap();
        assert_eq!(chunk, Chunk::NewMessage(None));
    }

    #[test]
    fn parses_error_chunk() {
        let chunk = parse_chunk(r#"{"type":"error","message":"rate limited"}"#).unwrap();
        assert_eq!(chunk, Chunk::Error("rate limited".to_string()));
    }

    #[test]
    fn untyped_object_flows_through_as_metadata() {
        let chunk = parse_chunk(r#"{"model":"gpt-4","usage":{"input_tokens":3}}"#).unwrap();
        match chunk {
            Chunk::Metadata(map) => assert_eq!(map["model"], "gpt-4"),
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn garbage_and_empty_payloads_dropped() {
        assert!(parse_chunk("").is_none());
        assert!(parse_chunk("not json").is_none());
        assert!(parse_chunk(r#""just a string""#).is_none());
    }

    #[test]
    fn factory_rejects_missing_chat_url() {
        let config = AgentConfig::default();
        let err = HttpInvokerFactory.create(&config).unwrap_err();
        assert!(matches!(err, InvokeError::Config(_)));
    }

    #[test]
    fn factory_builds_invoker_for_valid_config() {
        let mut config = AgentConfig::default();
        config.settings.chat_url = "http://backend/chat".to_string();
        assert!(HttpInvokerFactory.create(&config).is_ok());
    }

    #[test]
    fn content_chunk_without_content_field_is_empty() {
        let chunk = parse_chunk(r#"{"type":"content"}"#).unwrap();
        assert_eq!(chunk, Chunk::Content(String::new()));
    }
}
