use crate::commands::CommandResult;
use shopclerk_core::config::{AppConfig, LoadOptions};
use shopclerk_core::domain::store::StoreSettings;
use shopclerk_db::repositories::{NewStore, SqlStoreRepository, StoreRepository};
use shopclerk_db::{connect_with_settings, migrations};

const DEMO_SHOP: &str = "demo.myshopify.com";

/// Deterministic local-development fixture: one installed store with sample
/// policies, so the chat API can be exercised without an install flow.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
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
                "seed",
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

        let stores = SqlStoreRepository::new(pool.clone());
        let profile = stores
            .upsert(NewStore {
                shop: DEMO_SHOP.to_string(),
                access_token: "shpat_demo_token".to_string(),
                store_name: Some("Demo Outfitters".to_string()),
                settings: StoreSettings {
                    welcome_message: Some(
                        "Hi! Welcome to Demo Outfitters. How can I help today?".to_string(),
                    ),
                    return_policy: Some(
                        "We accept returns within 30 days of purchase. Items must be unworn and in original packaging."
                            .to_string(),
                    ),
                    shipping_policy: Some(
                        "We ship within 1-2 business days. Domestic orders typically arrive in 3-5 business days."
                            .to_string(),
                    ),
                    support_email: Some("support@demo.example".to_string()),
                    ..StoreSettings::default()
                },
            })
            .await
            .map_err(|error| ("seed_store", error.to_string(), 6u8))?;

        pool.close().await;
        Ok::<i64, (&'static str, String, u8)>(profile.id)
    });

    match result {
        Ok(store_id) => CommandResult::success(
            "seed",
            format!("demo store `{DEMO_SHOP}` ready (id {store_id})"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
