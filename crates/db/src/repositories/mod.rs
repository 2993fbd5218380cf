use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use shopclerk_core::domain::conversation::{Conversation, ConversationId, CustomerRef};
use shopclerk_core::domain::message::{Message, MessageMetadata, MessageRole};
use shopclerk_core::domain::store::{SettingsPatch, StoreProfile, StoreSettings};

pub mod conversation;
pub mod memory;
pub mod store;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryConversationRepository, InMemoryStoreRepository};
pub use store::SqlStoreRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Fields required to register a store. Used by install flows, seeds, and
/// tests; settings default when omitted.
#[derive(Clone, Debug)]
pub struct NewStore {
    pub shop: String,
    pub access_token: String,
    pub store_name: Option<String>,
    pub settings: StoreSettings,
}

/// Aggregate counters for a store's conversations, computed in SQL.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConversationAnalytics {
    pub total_conversations: i64,
    pub escalated_conversations: i64,
    pub resolved_conversations: i64,
    pub active_conversations: i64,
    pub escalation_rate: f64,
    pub resolution_rate: f64,
    pub avg_messages_per_conversation: f64,
}

#[async_trait]
pub trait StoreRepository: Send + Sync {
    async fn find_by_shop(&self, shop: &str) -> Result<Option<StoreProfile>, RepositoryError>;

    async fn upsert(&self, store: NewStore) -> Result<StoreProfile, RepositoryError>;

    async fn update_settings(
        &self,
        shop: &str,
        patch: SettingsPatch,
    ) -> Result<Option<StoreProfile>, RepositoryError>;

    /// Usage counter bump, applied as a single UPDATE.
    async fn increment_conversation_count(&self, store_id: i64) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Reuses the conversation when a valid id for this store is supplied,
    /// otherwise creates a fresh one.
    async fn get_or_create(
        &self,
        id: Option<&str>,
        store_id: i64,
        customer: &CustomerRef,
    ) -> Result<Conversation, RepositoryError>;

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    /// Appends one turn and bumps the conversation's message count and
    /// last-message timestamp in the same transaction; the count update is a
    /// single `SET message_count = message_count + 1`, never read-modify-write.
    async fn append_message(
        &self,
        id: &ConversationId,
        role: MessageRole,
        content: &str,
        metadata: &MessageMetadata,
    ) -> Result<Message, RepositoryError>;

    /// Oldest-first message history, capped at `limit`.
    async fn history(
        &self,
        id: &ConversationId,
        limit: i64,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn escalate(&self, id: &ConversationId, reason: &str) -> Result<(), RepositoryError>;

    async fn merge_metadata(
        &self,
        id: &ConversationId,
        extra: Map<String, Value>,
    ) -> Result<(), RepositoryError>;

    async fn analytics_summary(
        &self,
        store_id: i64,
    ) -> Result<ConversationAnalytics, RepositoryError>;

    /// Closes active conversations with no traffic since `cutoff`; returns
    /// how many were closed.
    async fn close_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
