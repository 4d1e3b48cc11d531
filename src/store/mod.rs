//! Durable message storage.
//!
//! The [`MessageStore`] trait is the persistence seam; the shipped backend is
//! in-memory. A database-backed implementation plugs in behind the same trait.

mod error;
mod memory;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryMessageStore;

use async_trait::async_trait;

use crate::models::{ChatHistoryEntry, Message};

/// Ordering for message listings, by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Parameters for listing messages in a conversation.
#[derive(Debug, Clone)]
pub struct ListMessages {
    pub conversation_id: String,
    pub tenant_id: String,
    pub limit: usize,
    pub skip: usize,
    pub order: SortOrder,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message. Ids are unique within a conversation.
    async fn add(&self, message: &Message) -> StorageResult<()>;

    /// List messages in a conversation with pagination.
    async fn list(&self, params: &ListMessages) -> StorageResult<Vec<Message>>;

    /// Project the most recent `limit` messages of a conversation into chat
    /// history entries, presented oldest-first when `order` is `Asc`.
    async fn list_history(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        limit: usize,
        order: SortOrder,
    ) -> StorageResult<Vec<ChatHistoryEntry>>;
}
