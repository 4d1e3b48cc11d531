//! Conversation message endpoints.
//!
//! `POST` opens a turn and answers with an SSE stream of typed signals;
//! `GET` lists persisted messages newest-first.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handlers::problem_details;
use crate::models::{new_conversation_id, new_message_id, Message, MessageRequest};
use crate::server::AppState;
use crate::store::{ListMessages, SortOrder};
use crate::transport::{signal_to_event, ChannelSink};
use crate::turn::{self, TurnRequest};

/// Buffered signals between the turn task and the SSE response. Backpressure
/// here slows the backend read rather than dropping output.
const SIGNAL_CHANNEL_BUFFER: usize = 32;

const DEFAULT_LIST_LIMIT: usize = 25;

// ============================================================================
// Send
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub application_id: String,
    pub message: MessagePayload,
    #[serde(default)]
    pub invoke_config: Option<InvokeConfig>,
}

#[derive(Debug, Deserialize)]
pub struct MessagePayload {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeConfig {
    #[serde(default)]
    pub chat_history_message_count: Option<usize>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    if req.message.content.trim().is_empty() {
        return problem_details::bad_request("message content must not be empty").into_response();
    }
    if req.application_id.trim().is_empty() {
        return problem_details::bad_request("applicationId must not be empty").into_response();
    }

    let auth_token = bearer_token(&headers).unwrap_or_default();
    let user_id = header_value(&headers, "x-user-id").unwrap_or_else(|| "anonymous".to_string());

    let conversation_id = req
        .conversation_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(new_conversation_id);
    let user_message_id = new_message_id();
    let assistant_message_id = new_message_id();
    let history_depth = req
        .invoke_config
        .as_ref()
        .and_then(|c| c.chat_history_message_count);

    debug!(
        tenant_id = %tenant_id,
        conversation_id = %conversation_id,
        message_id = %assistant_message_id,
        "starting message stream"
    );

    let turn_request = TurnRequest {
        tenant_id,
        user_id,
        conversation_id: conversation_id.clone(),
        application_id: req.application_id.clone(),
        user_message_id,
        assistant_message_id,
        content: req.message.content.clone(),
        auth_token,
        history_depth,
        request: Some(MessageRequest {
            application_id: req.application_id,
            conversation_id: req.conversation_id,
            content: req.message.content,
            history_depth,
        }),
    };

    let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_BUFFER);
    let deps = state.turn.clone();
    let cancel = CancellationToken::new();
    state.background_tasks.spawn(async move {
        let sink = ChannelSink::new(tx);
        turn::run_turn(&deps, turn_request, &sink, cancel).await;
    });

    let sse_stream =
        ReceiverStream::new(rx).map(|signal| Ok::<Event, Infallible>(signal_to_event(&signal)));

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(sse_stream).keep_alive(keep_alive).into_response()
}

// ============================================================================
// List
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    if query.conversation_id.is_empty() {
        return problem_details::bad_request("conversationId is required").into_response();
    }

    let params = ListMessages {
        conversation_id: query.conversation_id,
        tenant_id,
        limit: query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        skip: query.skip.unwrap_or(0),
        order: SortOrder::Desc,
    };
    match state.turn.store.list(&params).await {
        Ok(messages) => Json(MessagesResponse { messages }).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "message listing failed");
            problem_details::internal_error("failed to list messages").into_response()
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(|v| v.to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer secret-token".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("secret-token"));
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic dXNlcjpwYXNz".parse().unwrap(),
        );
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn empty_user_header_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "".parse().unwrap());
        assert!(header_value(&headers, "x-user-id").is_none());
    }
}
