use std::collections::HashMap;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use shopclerk_core::domain::conversation::{
    Conversation, ConversationId, ConversationStatus, CustomerRef,
};
use shopclerk_core::domain::message::{Message, MessageMetadata, MessageRole};
use shopclerk_core::domain::store::{SettingsPatch, StoreProfile};

use super::{
    ConversationAnalytics, ConversationRepository, NewStore, RepositoryError, StoreRepository,
};

/// Test doubles mirroring the SQL repositories. Same contracts, no database.
#[derive(Default)]
pub struct InMemoryStoreRepository {
    stores: RwLock<HashMap<String, StoreProfile>>,
}

impl InMemoryStoreRepository {
    pub async fn insert_profile(&self, profile: StoreProfile) {
        let mut stores = self.stores.write().await;
        stores.insert(profile.shop.clone(), profile);
    }
}

#[async_trait::async_trait]
impl StoreRepository for InMemoryStoreRepository {
    async fn find_by_shop(&self, shop: &str) -> Result<Option<StoreProfile>, RepositoryError> {
        let stores = self.stores.read().await;
        Ok(stores.get(shop).cloned())
    }

    async fn upsert(&self, store: NewStore) -> Result<StoreProfile, RepositoryError> {
        let mut stores = self.stores.write().await;
        let next_id = stores.len() as i64 + 1;
        let profile = match stores.get(&store.shop) {
            Some(existing) => StoreProfile {
                access_token: SecretString::from(store.access_token),
                store_name: store.store_name,
                settings: store.settings,
                active: true,
                ..existing.clone()
            },
            None => StoreProfile {
                id: next_id,
                shop: store.shop.clone(),
                access_token: SecretString::from(store.access_token),
                store_name: store.store_name,
                settings: store.settings,
                active: true,
                conversation_count: 0,
                conversation_limit: 1000,
                installed_at: Utc::now(),
            },
        };
        stores.insert(store.shop, profile.clone());
        Ok(profile)
    }

    async fn update_settings(
        &self,
        shop: &str,
        patch: SettingsPatch,
    ) -> Result<Option<StoreProfile>, RepositoryError> {
        let mut stores = self.stores.write().await;
        let Some(profile) = stores.get_mut(shop) else {
            return Ok(None);
        };
        profile.settings.apply_patch(patch);
        Ok(Some(profile.clone()))
    }

    async fn increment_conversation_count(&self, store_id: i64) -> Result<(), RepositoryError> {
        let mut stores = self.stores.write().await;
        for profile in stores.values_mut() {
            if profile.id == store_id {
                profile.conversation_count += 1;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    state: RwLock<ConversationState>,
}

#[derive(Default)]
struct ConversationState {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
    next_message_id: i64,
}

impl InMemoryConversationRepository {
    /// Seeds an existing conversation, used to test long-running threads.
    pub async fn insert_conversation(&self, conversation: Conversation) {
        let mut state = self.state.write().await;
        state.conversations.insert(conversation.id.0.clone(), conversation);
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn get_or_create(
        &self,
        id: Option<&str>,
        store_id: i64,
        customer: &CustomerRef,
    ) -> Result<Conversation, RepositoryError> {
        let mut state = self.state.write().await;

        if let Some(raw_id) = id {
            if let Some(existing) = state.conversations.get(raw_id) {
                if existing.store_id == store_id {
                    return Ok(existing.clone());
                }
            }
        }

        let conversation = Conversation::new(store_id, customer.clone());
        state.conversations.insert(conversation.id.0.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.conversations.get(&id.0).cloned())
    }

    async fn append_message(
        &self,
        id: &ConversationId,
        role: MessageRole,
        content: &str,
        metadata: &MessageMetadata,
    ) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        state.next_message_id += 1;
        let message = Message {
            id: state.next_message_id,
            conversation_id: id.clone(),
            role,
            content: content.to_string(),
            metadata: metadata.clone(),
            created_at: Utc::now(),
        };

        state.messages.entry(id.0.clone()).or_default().push(message.clone());
        if let Some(conversation) = state.conversations.get_mut(&id.0) {
            conversation.message_count += 1;
            conversation.last_message_at = message.created_at;
        }

        Ok(message)
    }

    async fn history(
        &self,
        id: &ConversationId,
        limit: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let messages = state.messages.get(&id.0).cloned().unwrap_or_default();
        Ok(messages.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn escalate(&self, id: &ConversationId, reason: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(conversation) = state.conversations.get_mut(&id.0) {
            conversation.escalate(reason);
        }
        Ok(())
    }

    async fn merge_metadata(
        &self,
        id: &ConversationId,
        extra: Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(conversation) = state.conversations.get_mut(&id.0) {
            conversation.merge_metadata(extra);
        }
        Ok(())
    }

    async fn analytics_summary(
        &self,
        store_id: i64,
    ) -> Result<ConversationAnalytics, RepositoryError> {
        let state = self.state.read().await;
        let for_store: Vec<&Conversation> =
            state.conversations.values().filter(|c| c.store_id == store_id).collect();

        let total = for_store.len() as i64;
        let escalated = for_store.iter().filter(|c| c.escalated).count() as i64;
        let resolved = for_store
            .iter()
            .filter(|c| c.status == ConversationStatus::Resolved)
            .count() as i64;
        let message_total: i64 = for_store.iter().map(|c| c.message_count).sum();

        let rate = |part: i64| if total > 0 { part as f64 * 100.0 / total as f64 } else { 0.0 };

        Ok(ConversationAnalytics {
            total_conversations: total,
            escalated_conversations: escalated,
            resolved_conversations: resolved,
            active_conversations: total - resolved,
            escalation_rate: rate(escalated),
            resolution_rate: rate(resolved),
            avg_messages_per_conversation: if total > 0 {
                message_total as f64 / total as f64
            } else {
                0.0
            },
        })
    }

    async fn close_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut closed = 0;
        for conversation in state.conversations.values_mut() {
            if conversation.status == ConversationStatus::Active
                && conversation.last_message_at < cutoff
            {
                conversation.status = ConversationStatus::Closed;
                closed += 1;
            }
        }
        Ok(closed)
    }
}
