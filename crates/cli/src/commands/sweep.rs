use chrono::{Duration, Utc};

use crate::commands::CommandResult;
use shopclerk_core::config::{AppConfig, LoadOptions};
use shopclerk_db::repositories::{ConversationRepository, SqlConversationRepository};
use shopclerk_db::{connect_with_settings, migrations};

/// Closes active conversations that have gone quiet. Widget sessions are
/// abandoned without a goodbye, so this is the only way threads ever close.
pub fn run(hours: u32) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let conversations = SqlConversationRepository::new(pool.clone());
        let cutoff = Utc::now() - Duration::hours(i64::from(hours));
        let closed = conversations
            .close_inactive(cutoff)
            .await
            .map_err(|error| ("sweep", error.to_string(), 6u8))?;

        pool.close().await;
        Ok::<u64, (&'static str, String, u8)>(closed)
    });

    match result {
        Ok(closed) => CommandResult::success(
            "sweep",
            format!("closed {closed} conversations idle for more than {hours}h"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
