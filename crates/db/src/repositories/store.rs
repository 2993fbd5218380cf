use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use shopclerk_core::domain::store::{SettingsPatch, StoreProfile, StoreSettings};

use super::conversation::parse_timestamp;
use super::{NewStore, RepositoryError, StoreRepository};
use crate::DbPool;

pub struct SqlStoreRepository {
    pool: DbPool,
}

impl SqlStoreRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn store_from_row(row: &SqliteRow) -> Result<StoreProfile, RepositoryError> {
    let settings_raw: String = row.get("settings");
    let settings: StoreSettings = serde_json::from_str(&settings_raw)
        .map_err(|error| RepositoryError::Decode(format!("bad settings document: {error}")))?;

    let installed_at: String = row.get("installed_at");
    let access_token: String = row.get("access_token");

    Ok(StoreProfile {
        id: row.get("id"),
        shop: row.get("shop"),
        access_token: SecretString::from(access_token),
        store_name: row.get("store_name"),
        settings,
        active: row.get::<i64, _>("active") != 0,
        conversation_count: row.get("conversation_count"),
        conversation_limit: row.get("conversation_limit"),
        installed_at: parse_timestamp(&installed_at)?,
    })
}

fn encode_settings(settings: &StoreSettings) -> Result<String, RepositoryError> {
    serde_json::to_string(settings)
        .map_err(|error| RepositoryError::Decode(format!("bad settings document: {error}")))
}

#[async_trait]
impl StoreRepository for SqlStoreRepository {
    async fn find_by_shop(&self, shop: &str) -> Result<Option<StoreProfile>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM stores WHERE shop = ?")
            .bind(shop)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(store_from_row).transpose()
    }

    async fn upsert(&self, store: NewStore) -> Result<StoreProfile, RepositoryError> {
        let settings_json = encode_settings(&store.settings)?;

        sqlx::query(
            "INSERT INTO stores (shop, access_token, store_name, settings, installed_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (shop) DO UPDATE SET \
               access_token = excluded.access_token, \
               store_name = excluded.store_name, \
               settings = excluded.settings, \
               active = 1",
        )
        .bind(&store.shop)
        .bind(&store.access_token)
        .bind(&store.store_name)
        .bind(&settings_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let stored = self.find_by_shop(&store.shop).await?;
        stored.ok_or_else(|| RepositoryError::Decode("store vanished after upsert".to_string()))
    }

    async fn update_settings(
        &self,
        shop: &str,
        patch: SettingsPatch,
    ) -> Result<Option<StoreProfile>, RepositoryError> {
        let Some(mut profile) = self.find_by_shop(shop).await? else {
            return Ok(None);
        };

        profile.settings.apply_patch(patch);
        let settings_json = encode_settings(&profile.settings)?;

        sqlx::query("UPDATE stores SET settings = ? WHERE shop = ?")
            .bind(&settings_json)
            .bind(shop)
            .execute(&self.pool)
            .await?;

        Ok(Some(profile))
    }

    async fn increment_conversation_count(&self, store_id: i64) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE stores SET conversation_count = conversation_count + 1 WHERE id = ?")
            .bind(store_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use shopclerk_core::domain::store::{BotPersonality, SettingsPatch, StoreSettings};

    use crate::migrations::run_pending;
    use crate::repositories::{NewStore, SqlStoreRepository, StoreRepository};
    use crate::{connect_with_settings, DbPool};

    async fn migrated_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect in-memory");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    fn new_store() -> NewStore {
        NewStore {
            shop: "demo.myshopify.com".to_string(),
            access_token: "shpat_test".to_string(),
            store_name: Some("Demo Outfitters".to_string()),
            settings: StoreSettings {
                support_email: Some("help@demo.example".to_string()),
                ..StoreSettings::default()
            },
        }
    }

    #[tokio::test]
    async fn upsert_then_find_round_trips_profile() {
        let repo = SqlStoreRepository::new(migrated_pool().await);
        let created = repo.upsert(new_store()).await.expect("upsert");

        let found = repo
            .find_by_shop("demo.myshopify.com")
            .await
            .expect("find")
            .expect("store exists");

        assert_eq!(found.id, created.id);
        assert_eq!(found.store_name.as_deref(), Some("Demo Outfitters"));
        assert_eq!(found.access_token.expose_secret(), "shpat_test");
        assert_eq!(found.settings.support_email.as_deref(), Some("help@demo.example"));
        assert!(found.active);
        assert_eq!(found.conversation_count, 0);
        assert_eq!(found.conversation_limit, 1000);
    }

    #[tokio::test]
    async fn reinstall_keeps_one_row_per_shop() {
        let repo = SqlStoreRepository::new(migrated_pool().await);
        let first = repo.upsert(new_store()).await.expect("first install");

        let mut reinstall = new_store();
        reinstall.access_token = "shpat_rotated".to_string();
        let second = repo.upsert(reinstall).await.expect("reinstall");

        assert_eq!(first.id, second.id);
        assert_eq!(second.access_token.expose_secret(), "shpat_rotated");
    }

    #[tokio::test]
    async fn update_settings_merges_patch_fields() {
        let repo = SqlStoreRepository::new(migrated_pool().await);
        repo.upsert(new_store()).await.expect("upsert");

        let updated = repo
            .update_settings(
                "demo.myshopify.com",
                SettingsPatch {
                    bot_personality: Some(BotPersonality::Efficient),
                    return_policy: Some("30 days.".to_string()),
                    ..SettingsPatch::default()
                },
            )
            .await
            .expect("update")
            .expect("store exists");

        assert_eq!(updated.settings.bot_personality, BotPersonality::Efficient);
        assert_eq!(updated.settings.return_policy.as_deref(), Some("30 days."));
        // untouched field survives the merge
        assert_eq!(updated.settings.support_email.as_deref(), Some("help@demo.example"));

        let missing = repo
            .update_settings("ghost.myshopify.com", SettingsPatch::default())
            .await
            .expect("update unknown shop");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn increment_bumps_usage_counter() {
        let repo = SqlStoreRepository::new(migrated_pool().await);
        let store = repo.upsert(new_store()).await.expect("upsert");

        repo.increment_conversation_count(store.id).await.expect("bump");
        repo.increment_conversation_count(store.id).await.expect("bump again");

        let found = repo
            .find_by_shop("demo.myshopify.com")
            .await
            .expect("find")
            .expect("store exists");
        assert_eq!(found.conversation_count, 2);
    }
}
