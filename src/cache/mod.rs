//! Session cache.
//!
//! Cached sessions carry the resolved agent config and the working chat
//! history for a `(tenant, user, conversation)` triple, so steady-state turns
//! skip both the config fetch and the durable-store history read. The cache
//! is an optimization layer: every read failure degrades to a miss.

mod memory;

pub use memory::{MemorySessionCache, DEFAULT_SESSION_TTL};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ChatHistoryEntry;
use crate::platform::AgentConfig;

/// Cached working state for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub tenant_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub config: AgentConfig,
    #[serde(default)]
    pub chat_history: Vec<ChatHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        config: AgentConfig,
        chat_history: Vec<ChatHistoryEntry>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            config,
            chat_history,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("session not found")]
    NotFound,

    #[error("cached session corrupted: {0}")]
    Corrupted(String),
}

#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Look up a session. `Ok(None)` is a miss; errors are reported so the
    /// caller can log them distinctly before degrading to a miss.
    async fn get(
        &self,
        tenant_id: &str,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<SessionData>, CacheError>;

    /// Store a session, resetting its TTL.
    async fn set(&self, session: SessionData) -> Result<(), CacheError>;

    /// Append entries to an existing session's history and refresh its TTL.
    /// Fails with [`CacheError::NotFound`] when no live session exists.
    async fn append_history(
        &self,
        tenant_id: &str,
        user_id: &str,
        conversation_id: &str,
        entries: Vec<ChatHistoryEntry>,
    ) -> Result<(), CacheError>;
}
