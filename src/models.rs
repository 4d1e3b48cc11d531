//! Domain models for conversation messages.
//!
//! User and assistant messages live in a single collection, differentiated
//! by the `kind` field (`type` on the wire). Assistant messages additionally
//! carry a processing status, backend metadata, and append-only status traces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Enums
// ============================================================================

/// Whether a message originated from the user or the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
}

/// Processing status of an assistant message.
///
/// Write-once-terminal: once a message is persisted as `Success` or `Error`,
/// it is never reopened — a multi-message turn creates a new record instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Success,
    Error,
}

// ============================================================================
// Message
// ============================================================================

/// The original request that triggered a user message, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub application_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_depth: Option<usize>,
}

/// Metadata reported by the backend for an assistant response.
///
/// Merged incrementally as metadata chunks arrive: later non-empty values
/// overwrite earlier empty ones, but an already-set `execution_id` is never
/// overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_type: String,
    #[serde(default)]
    pub latency_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_input: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_output: Option<u64>,
}

/// An append-only annotation describing backend-internal progress.
///
/// Purely observational — never read back to drive logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTrace {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// A message in a conversation, user or assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub tenant_id: String,
    pub conversation_id: String,
    pub application_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // User message fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<MessageRequest>,

    // Assistant message fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message_id: Option<String>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_traces: Vec<StatusTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AssistantMetadata>,
}

impl Message {
    /// Create a new user message.
    pub fn user(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
        application_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
        request: Option<MessageRequest>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind: MessageKind::User,
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            application_id: application_id.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
            user_id: Some(user_id.into()),
            request,
            user_message_id: None,
            status: MessageStatus::Success,
            error_message: None,
            status_traces: Vec::new(),
            metadata: None,
        }
    }

    /// Create a new pending assistant message linked to the triggering user message.
    pub fn assistant(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
        application_id: impl Into<String>,
        user_message_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind: MessageKind::Assistant,
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            application_id: application_id.into(),
            content: String::new(),
            created_at: now,
            updated_at: now,
            user_id: None,
            request: None,
            user_message_id: Some(user_message_id.into()),
            status: MessageStatus::Pending,
            error_message: None,
            status_traces: Vec::new(),
            metadata: None,
        }
    }

    /// Finalize with the given content and `Success` status.
    pub fn set_success(&mut self, content: String) {
        self.content = content;
        self.status = MessageStatus::Success;
        self.updated_at = Utc::now();
    }

    /// Finalize with `Error` status. Accumulated content is discarded in
    /// favor of the error detail.
    pub fn set_error(&mut self, error_message: impl Into<String>) {
        self.status = MessageStatus::Error;
        self.error_message = Some(error_message.into());
        self.content = String::new();
        self.updated_at = Utc::now();
    }

    /// Append a status trace entry.
    pub fn add_status_trace(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        detail: impl Into<String>,
        attributes: Map<String, Value>,
    ) {
        self.status_traces.push(StatusTrace {
            kind: kind.into(),
            name: name.into(),
            detail: detail.into(),
            attributes,
            timestamp: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Merge a backend metadata map into this message.
    ///
    /// Recognized keys: `execution_id` (first-wins), `model`, `agent_name`,
    /// `usage.input_tokens`, `usage.output_tokens`. A map carrying
    /// `type = "workflow_action"` is additionally recorded as a status trace.
    pub fn apply_backend_metadata(&mut self, map: &Map<String, Value>) {
        let meta = self.metadata.get_or_insert_with(AssistantMetadata::default);

        if meta.execution_id.is_none() {
            if let Some(id) = non_empty_str(map, "execution_id") {
                meta.execution_id = Some(id.to_string());
            }
        }
        if let Some(model) = non_empty_str(map, "model") {
            meta.model = Some(model.to_string());
        }
        if let Some(name) = non_empty_str(map, "agent_name") {
            meta.agent_type = name.to_string();
        }
        if let Some(Value::Object(usage)) = map.get("usage") {
            if let Some(n) = usage.get("input_tokens").and_then(Value::as_u64) {
                meta.tokens_input = Some(n);
            }
            if let Some(n) = usage.get("output_tokens").and_then(Value::as_u64) {
                meta.tokens_output = Some(n);
            }
        }

        if map.get("type").and_then(Value::as_str) == Some("workflow_action") {
            let mut attributes = Map::new();
            for key in ["action_id", "parent_action_id", "previous_action_id", "status"] {
                if let Some(v) = map.get(key) {
                    attributes.insert(key.to_string(), v.clone());
                }
            }
            let name = map
                .get("kind")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.add_status_trace("workflow_action", name, "", attributes);
        } else {
            self.updated_at = Utc::now();
        }
    }

    /// Project this message into a chat history entry.
    pub fn to_history_entry(&self) -> ChatHistoryEntry {
        ChatHistoryEntry {
            role: self.kind,
            content: self.content.clone(),
            timestamp: self.created_at,
        }
    }
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

// ============================================================================
// Ids
// ============================================================================

/// New message id, `msg_` + ULID.
pub fn new_message_id() -> String {
    format!("msg_{}", ulid::Ulid::new())
}

/// New conversation id, `conv_` + ULID.
pub fn new_conversation_id() -> String {
    format!("conv_{}", ulid::Ulid::new())
}

// ============================================================================
// Chat History
// ============================================================================

/// A read-projection of a message, re-fed into future invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryEntry {
    pub role: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
