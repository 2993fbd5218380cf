use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use shopclerk_agent::llm::{AnthropicClient, GenerateOptions, LlmClient, LlmError};
use shopclerk_agent::notify::{LogNotifier, Notifier, NotifyError, SmtpNotifier};
use shopclerk_agent::runtime::AgentRuntime;
use shopclerk_commerce::{CommerceApi, CommerceError, ShopifyClient};
use shopclerk_core::config::{AppConfig, ConfigError, LoadOptions};
use shopclerk_db::repositories::{
    ConversationRepository, SqlConversationRepository, SqlStoreRepository, StoreRepository,
};
use shopclerk_db::{connect_with_settings, migrations, DbPool};

use crate::chat::ChatState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub chat_state: ChatState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[source] LlmError),
    #[error("commerce client setup failed: {0}")]
    Commerce(#[source] CommerceError),
    #[error("notifier setup failed: {0}")]
    Notifier(#[source] NotifyError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let stores: Arc<dyn StoreRepository> = Arc::new(SqlStoreRepository::new(db_pool.clone()));
    let conversations: Arc<dyn ConversationRepository> =
        Arc::new(SqlConversationRepository::new(db_pool.clone()));

    let llm: Arc<dyn LlmClient> =
        Arc::new(AnthropicClient::new(&config.llm).map_err(BootstrapError::Llm)?);
    let commerce: Arc<dyn CommerceApi> =
        Arc::new(ShopifyClient::new(&config.commerce).map_err(BootstrapError::Commerce)?);

    let notifier: Arc<dyn Notifier> = if config.smtp.enabled {
        Arc::new(SmtpNotifier::new(&config.smtp).map_err(BootstrapError::Notifier)?)
    } else {
        Arc::new(LogNotifier)
    };
    info!(
        event_name = "system.bootstrap.notifier_ready",
        smtp_enabled = config.smtp.enabled,
        "escalation notifier initialized"
    );

    let runtime = AgentRuntime::new(
        llm,
        commerce,
        Arc::clone(&conversations),
        Arc::clone(&stores),
        notifier,
        GenerateOptions { max_tokens: config.llm.max_tokens, temperature: 1.0 },
    );

    let chat_state = ChatState { runtime: Arc::new(runtime), stores, conversations };

    Ok(Application { config, db_pool, chat_state })
}

#[cfg(test)]
mod tests {
    use shopclerk_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                llm_api_key: Some("sk-ant-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_api_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_and_state() {
        let app = bootstrap(overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('stores', 'conversations', 'messages')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected baseline tables after bootstrap");
        assert_eq!(table_count, 3, "bootstrap should expose the chat-path tables");

        assert_eq!(app.config.llm.model, "claude-sonnet-4-20250514");
    }
}
