//! In-memory TTL session cache.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{CacheError, SessionCache, SessionData};
use crate::models::ChatHistoryEntry;

/// Sessions expire three minutes after their last write.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(180);

#[derive(Debug, Clone)]
struct Entry {
    session: SessionData,
    expires_at: DateTime<Utc>,
}

/// Session cache backed by a concurrent map with per-entry expiry.
///
/// Expired entries are treated as misses and removed lazily on access.
#[derive(Debug)]
pub struct MemorySessionCache {
    entries: DashMap<String, Entry>,
    ttl: chrono::Duration,
}

impl MemorySessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(180)),
        }
    }

    fn key(tenant_id: &str, user_id: &str, conversation_id: &str) -> String {
        format!("session:{}:{}:{}", tenant_id, user_id, conversation_id)
    }
}

impl Default for MemorySessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn get(
        &self,
        tenant_id: &str,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<SessionData>, CacheError> {
        let key = Self::key(tenant_id, user_id, conversation_id);
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.expires_at > Utc::now() => {
                return Ok(Some(entry.session.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        Ok(None)
    }

    async fn set(&self, mut session: SessionData) -> Result<(), CacheError> {
        let key = Self::key(&session.tenant_id, &session.user_id, &session.conversation_id);
        session.updated_at = Utc::now();
        self.entries.insert(
            key,
            Entry {
                expires_at: Utc::now() + self.ttl,
                session,
            },
        );
        Ok(())
    }

    async fn append_history(
        &self,
        tenant_id: &str,
        user_id: &str,
        conversation_id: &str,
        entries: Vec<ChatHistoryEntry>,
    ) -> Result<(), CacheError> {
        let key = Self::key(tenant_id, user_id, conversation_id);
        let mut entry = match self.entries.get_mut(&key) {
            Some(entry) if entry.expires_at > Utc::now() => entry,
            _ => return Err(CacheError::NotFound),
        };
        entry.session.chat_history.extend(entries);
        entry.session.updated_at = Utc::now();
        entry.expires_at = Utc::now() + self.ttl;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;
    use crate::platform::AgentConfig;

    fn session(tenant: &str, user: &str, conv: &str) -> SessionData {
        SessionData::new(tenant, user, conv, AgentConfig::default(), Vec::new())
    }

    fn entry(content: &str) -> ChatHistoryEntry {
        ChatHistoryEntry {
            role: MessageKind::User,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let cache = MemorySessionCache::default();
        assert!(cache.get("t1", "u1", "conv_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get() {
        let cache = MemorySessionCache::default();
        cache.set(session("t1", "u1", "conv_1")).await.unwrap();
        let found = cache.get("t1", "u1", "conv_1").await.unwrap().unwrap();
        assert_eq!(found.conversation_id, "conv_1");
    }

    #[tokio::test]
    async fn zero_ttl_entries_expire() {
        let cache = MemorySessionCache::new(Duration::from_secs(0));
        cache.set(session("t1", "u1", "conv_1")).await.unwrap();
        assert!(cache.get("t1", "u1", "conv_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_to_missing_session_fails() {
        let cache = MemorySessionCache::default();
        let err = cache
            .append_history("t1", "u1", "conv_1", vec![entry("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound));
    }

    #[tokio::test]
    async fn append_never_trims() {
        let cache = MemorySessionCache::default();
        cache.set(session("t1", "u1", "conv_1")).await.unwrap();
        for i in 0..41 {
            cache
                .append_history("t1", "u1", "conv_1", vec![entry(&format!("m{i}"))])
                .await
                .unwrap();
        }
        let found = cache.get("t1", "u1", "conv_1").await.unwrap().unwrap();
        assert_eq!(found.chat_history.len(), 41);
    }

    #[tokio::test]
    async fn sessions_are_scoped_per_user() {
        let cache = MemorySessionCache::default();
        cache.set(session("t1", "u1", "conv_1")).await.unwrap();
        assert!(cache.get("t1", "u2", "conv_1").await.unwrap().is_none());
    }
}
