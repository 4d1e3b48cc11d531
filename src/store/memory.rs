//! In-memory message store.

use dashmap::DashMap;

use async_trait::async_trait;

use super::{ListMessages, MessageStore, SortOrder, StorageError, StorageResult};
use crate::models::{ChatHistoryEntry, Message};

/// Message store backed by a concurrent map, keyed by tenant + conversation.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    conversations: DashMap<String, Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant_id: &str, conversation_id: &str) -> String {
        format!("{}\0{}", tenant_id, conversation_id)
    }

    /// Total number of stored messages, across conversations.
    pub fn len(&self) -> usize {
        self.conversations.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn add(&self, message: &Message) -> StorageResult<()> {
        let key = Self::key(&message.tenant_id, &message.conversation_id);
        let mut messages = self.conversations.entry(key).or_default();
        if messages.iter().any(|m| m.id == message.id) {
            return Err(StorageError::backend(format!(
                "duplicate message id: {}",
                message.id
            )));
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn list(&self, params: &ListMessages) -> StorageResult<Vec<Message>> {
        let key = Self::key(&params.tenant_id, &params.conversation_id);
        let Some(messages) = self.conversations.get(&key) else {
            return Ok(Vec::new());
        };

        let mut sorted = messages.clone();
        sorted.sort_by_key(|m| m.created_at);
        if params.order == SortOrder::Desc {
            sorted.reverse();
        }
        Ok(sorted
            .into_iter()
            .skip(params.skip)
            .take(params.limit)
            .collect())
    }

    async fn list_history(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        limit: usize,
        order: SortOrder,
    ) -> StorageResult<Vec<ChatHistoryEntry>> {
        let key = Self::key(tenant_id, conversation_id);
        let Some(messages) = self.conversations.get(&key) else {
            return Ok(Vec::new());
        };

        let mut sorted = messages.clone();
        sorted.sort_by_key(|m| m.created_at);
        // Most recent `limit`, presented oldest-first for Asc.
        let start = sorted.len().saturating_sub(limit);
        let mut entries: Vec<ChatHistoryEntry> =
            sorted[start..].iter().map(Message::to_history_entry).collect();
        if order == SortOrder::Desc {
            entries.reverse();
        }
        Ok(entries)
    }
}
