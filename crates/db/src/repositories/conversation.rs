use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use shopclerk_core::domain::conversation::{
    Conversation, ConversationId, ConversationStatus, CustomerRef,
};
use shopclerk_core::domain::message::{Message, MessageMetadata, MessageRole};

use super::{ConversationAnalytics, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("bad timestamp `{raw}`: {error}")))
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    let status_raw: String = row.get("status");
    let status = ConversationStatus::parse(&status_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let metadata_raw: String = row.get("metadata");
    let metadata: Map<String, Value> = serde_json::from_str(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("bad metadata document: {error}")))?;

    let last_message_at: String = row.get("last_message_at");
    let created_at: String = row.get("created_at");
    let resolved_at: Option<String> = row.get("resolved_at");

    Ok(Conversation {
        id: ConversationId(row.get("id")),
        store_id: row.get("store_id"),
        customer_email: row.get("customer_email"),
        customer_name: row.get("customer_name"),
        customer_external_id: row.get("customer_external_id"),
        status,
        escalated: row.get::<i64, _>("escalated") != 0,
        escalation_reason: row.get("escalation_reason"),
        metadata,
        message_count: row.get("message_count"),
        last_message_at: parse_timestamp(&last_message_at)?,
        resolved_at: resolved_at.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw: String = row.get("role");
    let role = MessageRole::parse(&role_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let metadata_raw: String = row.get("metadata");
    let metadata: MessageMetadata = serde_json::from_str(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("bad message metadata: {error}")))?;

    let created_at: String = row.get("created_at");

    Ok(Message {
        id: row.get("id"),
        conversation_id: ConversationId(row.get("conversation_id")),
        role,
        content: row.get("content"),
        metadata,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn get_or_create(
        &self,
        id: Option<&str>,
        store_id: i64,
        customer: &CustomerRef,
    ) -> Result<Conversation, RepositoryError> {
        if let Some(raw_id) = id {
            let existing = self.find_by_id(&ConversationId(raw_id.to_string())).await?;
            if let Some(conversation) = existing {
                if conversation.store_id == store_id {
                    return Ok(conversation);
                }
            }
        }

        let conversation = Conversation::new(store_id, customer.clone());
        sqlx::query(
            "INSERT INTO conversations \
             (id, store_id, customer_email, customer_name, customer_external_id, status, \
              escalated, escalation_reason, metadata, message_count, last_message_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, NULL, '{}', 0, ?, ?)",
        )
        .bind(&conversation.id.0)
        .bind(conversation.store_id)
        .bind(&conversation.customer_email)
        .bind(&conversation.customer_name)
        .bind(&conversation.customer_external_id)
        .bind(conversation.status.as_str())
        .bind(conversation.last_message_at.to_rfc3339())
        .bind(conversation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn append_message(
        &self,
        id: &ConversationId,
        role: MessageRole,
        content: &str,
        metadata: &MessageMetadata,
    ) -> Result<Message, RepositoryError> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|error| RepositoryError::Decode(format!("bad message metadata: {error}")))?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(role.as_str())
        .bind(content)
        .bind(&metadata_json)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations \
             SET message_count = message_count + 1, last_message_at = ? \
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Message {
            id: inserted.last_insert_rowid(),
            conversation_id: id.clone(),
            role,
            content: content.to_string(),
            metadata: metadata.clone(),
            created_at: now,
        })
    }

    async fn history(
        &self,
        id: &ConversationId,
        limit: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY id ASC LIMIT ?",
        )
        .bind(&id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn escalate(&self, id: &ConversationId, reason: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE conversations \
             SET escalated = 1, status = 'escalated', escalation_reason = ? \
             WHERE id = ?",
        )
        .bind(reason)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn merge_metadata(
        &self,
        id: &ConversationId,
        extra: Map<String, Value>,
    ) -> Result<(), RepositoryError> {
        let patch = serde_json::to_string(&Value::Object(extra))
            .map_err(|error| RepositoryError::Decode(format!("bad metadata patch: {error}")))?;

        sqlx::query("UPDATE conversations SET metadata = json_patch(metadata, ?) WHERE id = ?")
            .bind(&patch)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn analytics_summary(
        &self,
        store_id: i64,
    ) -> Result<ConversationAnalytics, RepositoryError> {
        let row = sqlx::query(
            "SELECT \
               COUNT(*) AS total, \
               COALESCE(SUM(escalated), 0) AS escalated, \
               COALESCE(SUM(CASE WHEN status = 'resolved' THEN 1 ELSE 0 END), 0) AS resolved, \
               COALESCE(AVG(message_count), 0.0) AS avg_messages \
             FROM conversations WHERE store_id = ?",
        )
        .bind(store_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let escalated: i64 = row.get("escalated");
        let resolved: i64 = row.get("resolved");
        let avg_messages: f64 = row.get("avg_messages");

        let rate = |part: i64| if total > 0 { part as f64 * 100.0 / total as f64 } else { 0.0 };

        Ok(ConversationAnalytics {
            total_conversations: total,
            escalated_conversations: escalated,
            resolved_conversations: resolved,
            active_conversations: total - resolved,
            escalation_rate: rate(escalated),
            resolution_rate: rate(resolved),
            avg_messages_per_conversation: avg_messages,
        })
    }

    async fn close_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET status = 'closed' \
             WHERE status = 'active' AND last_message_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Map;

    use shopclerk_core::domain::conversation::{ConversationStatus, CustomerRef};
    use shopclerk_core::domain::message::{MessageMetadata, MessageRole};
    use shopclerk_core::domain::store::StoreSettings;

    use crate::migrations::run_pending;
    use crate::repositories::{
        ConversationRepository, NewStore, SqlConversationRepository, SqlStoreRepository,
        StoreRepository,
    };
    use crate::{connect_with_settings, DbPool};

    async fn pool_with_store() -> (DbPool, i64) {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect in-memory");
        run_pending(&pool).await.expect("migrations");

        let stores = SqlStoreRepository::new(pool.clone());
        let store = stores
            .upsert(NewStore {
                shop: "demo.myshopify.com".to_string(),
                access_token: "shpat_test".to_string(),
                store_name: Some("Demo Outfitters".to_string()),
                settings: StoreSettings::default(),
            })
            .await
            .expect("seed store");

        (pool, store.id)
    }

    #[tokio::test]
    async fn get_or_create_creates_then_reuses() {
        let (pool, store_id) = pool_with_store().await;
        let repo = SqlConversationRepository::new(pool.clone());

        let customer =
            CustomerRef { email: Some("shopper@example.com".to_string()), ..CustomerRef::default() };
        let created = repo.get_or_create(None, store_id, &customer).await.expect("create");
        assert_eq!(created.message_count, 0);
        assert_eq!(created.status, ConversationStatus::Active);

        let reused = repo
            .get_or_create(Some(&created.id.0), store_id, &customer)
            .await
            .expect("reuse");
        assert_eq!(reused.id, created.id);

        // An id belonging to another store must not be reused.
        let other_store = SqlStoreRepository::new(pool)
            .upsert(NewStore {
                shop: "other.myshopify.com".to_string(),
                access_token: "shpat_other".to_string(),
                store_name: None,
                settings: StoreSettings::default(),
            })
            .await
            .expect("seed second store");
        let foreign = repo
            .get_or_create(Some(&created.id.0), other_store.id, &customer)
            .await
            .expect("fresh for other store");
        assert_ne!(foreign.id, created.id);
    }

    #[tokio::test]
    async fn append_message_round_trips_and_bumps_count() {
        let (pool, store_id) = pool_with_store().await;
        let repo = SqlConversationRepository::new(pool);
        let conversation =
            repo.get_or_create(None, store_id, &CustomerRef::default()).await.expect("create");

        let metadata = MessageMetadata {
            tokens: Some(42),
            response_time_ms: Some(800),
            model: Some("claude-sonnet-4-20250514".to_string()),
            order_number: None,
            escalated: false,
        };

        repo.append_message(&conversation.id, MessageRole::User, "where is my order", &Default::default())
            .await
            .expect("append user turn");
        let stored = repo
            .append_message(&conversation.id, MessageRole::Assistant, "let me check", &metadata)
            .await
            .expect("append assistant turn");

        let reloaded = repo.history(&conversation.id, 20).await.expect("history");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[0].role, MessageRole::User);
        assert_eq!(reloaded[1].role, MessageRole::Assistant);
        assert_eq!(reloaded[1].content, "let me check");
        assert_eq!(reloaded[1].metadata, metadata);
        assert_eq!(reloaded[1].id, stored.id);

        let refreshed =
            repo.find_by_id(&conversation.id).await.expect("find").expect("conversation exists");
        assert_eq!(refreshed.message_count, 2);
        assert!(refreshed.last_message_at >= conversation.last_message_at);
    }

    #[tokio::test]
    async fn escalate_updates_status_flag_and_reason() {
        let (pool, store_id) = pool_with_store().await;
        let repo = SqlConversationRepository::new(pool);
        let conversation =
            repo.get_or_create(None, store_id, &CustomerRef::default()).await.expect("create");

        repo.escalate(&conversation.id, "Customer requested a human").await.expect("escalate");

        let refreshed =
            repo.find_by_id(&conversation.id).await.expect("find").expect("conversation exists");
        assert!(refreshed.escalated);
        assert_eq!(refreshed.status, ConversationStatus::Escalated);
        assert_eq!(refreshed.escalation_reason.as_deref(), Some("Customer requested a human"));
    }

    #[tokio::test]
    async fn merge_metadata_patches_existing_document() {
        let (pool, store_id) = pool_with_store().await;
        let repo = SqlConversationRepository::new(pool);
        let conversation =
            repo.get_or_create(None, store_id, &CustomerRef::default()).await.expect("create");

        let mut first = Map::new();
        first.insert("orderNumber".to_string(), "4521".into());
        repo.merge_metadata(&conversation.id, first).await.expect("first patch");

        let mut second = Map::new();
        second.insert("orderId".to_string(), 99.into());
        repo.merge_metadata(&conversation.id, second).await.expect("second patch");

        let refreshed =
            repo.find_by_id(&conversation.id).await.expect("find").expect("conversation exists");
        assert_eq!(refreshed.metadata["orderNumber"], "4521");
        assert_eq!(refreshed.metadata["orderId"], 99);
    }

    #[tokio::test]
    async fn analytics_reflect_escalations_and_resolutions() {
        let (pool, store_id) = pool_with_store().await;
        let repo = SqlConversationRepository::new(pool.clone());

        let first =
            repo.get_or_create(None, store_id, &CustomerRef::default()).await.expect("create");
        let _second =
            repo.get_or_create(None, store_id, &CustomerRef::default()).await.expect("create");

        repo.escalate(&first.id, "Sensitive topic").await.expect("escalate");

        let analytics = repo.analytics_summary(store_id).await.expect("analytics");
        assert_eq!(analytics.total_conversations, 2);
        assert_eq!(analytics.escalated_conversations, 1);
        assert_eq!(analytics.resolved_conversations, 0);
        assert_eq!(analytics.active_conversations, 2);
        assert!((analytics.escalation_rate - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn close_inactive_only_touches_stale_active_conversations() {
        let (pool, store_id) = pool_with_store().await;
        let repo = SqlConversationRepository::new(pool.clone());

        let stale =
            repo.get_or_create(None, store_id, &CustomerRef::default()).await.expect("create");
        let fresh =
            repo.get_or_create(None, store_id, &CustomerRef::default()).await.expect("create");
        repo.append_message(&fresh.id, MessageRole::User, "hello", &Default::default())
            .await
            .expect("keep fresh conversation current");

        // Age the stale conversation past the cutoff.
        let old = (Utc::now() - Duration::hours(48)).to_rfc3339();
        sqlx::query("UPDATE conversations SET last_message_at = ? WHERE id = ?")
            .bind(&old)
            .bind(&stale.id.0)
            .execute(&pool)
            .await
            .expect("age conversation");

        let closed = repo.close_inactive(Utc::now() - Duration::hours(24)).await.expect("sweep");
        assert_eq!(closed, 1);

        let stale_after = repo.find_by_id(&stale.id).await.expect("find").expect("exists");
        let fresh_after = repo.find_by_id(&fresh.id).await.expect("find").expect("exists");
        assert_eq!(stale_after.status, ConversationStatus::Closed);
        assert_eq!(fresh_after.status, ConversationStatus::Active);
    }
}
