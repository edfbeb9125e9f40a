//! Persistence boundary for message records.
//!
//! The pipeline hands finished [`MessageRecord`]s to a [`MessageStore`] and
//! reads them back per conversation. Storage technology is the
//! implementor's concern; [`InMemoryStore`] keeps everything in a map.

use std::collections::HashMap;

use tokio::sync::RwLock;

use qchat_proto::message::{ConversationId, MessageRecord};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying storage is unavailable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// A read operation failed.
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Trait for persisting message records.
pub trait MessageStore: Send + Sync {
    /// Persists a new record.
    fn save(
        &self,
        record: &MessageRecord,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// All records of a conversation, oldest first.
    fn conversation(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<Vec<MessageRecord>, StoreError>> + Send;

    /// The most recent record of a conversation, if any.
    fn latest(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<Option<MessageRecord>, StoreError>> + Send;
}

/// In-memory [`MessageStore`], records kept per conversation in insertion order.
pub struct InMemoryStore {
    conversations: RwLock<HashMap<ConversationId, Vec<MessageRecord>>>,
}

impl InMemoryStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of stored records.
    pub async fn len(&self) -> usize {
        self.conversations.read().await.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for InMemoryStore {
    async fn save(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .entry(record.conversation_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(conversation).cloned().unwrap_or_default())
    }

    async fn latest(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation)
            .and_then(|records| records.last().cloned()))
    }
}
