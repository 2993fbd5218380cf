mod bootstrap;
mod chat;
mod health;

use anyhow::Result;
use axum::http::{header, HeaderValue, Method};
use shopclerk_core::config::{AppConfig, LoadOptions};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

fn init_logging(config: &AppConfig) {
    use shopclerk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

/// The chat API is called cross-origin from storefront pages; lock it to the
/// configured widget origin when one is set.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    match &config.server.allowed_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => base.allow_origin(value),
            Err(_) => {
                warn!(
                    event_name = "system.server.bad_allowed_origin",
                    origin = %origin,
                    "allowed origin is not a valid header value, allowing any origin"
                );
                base.allow_origin(Any)
            }
        },
        None => base.allow_origin(Any),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = chat::router(app.chat_state.clone())
        .merge(health::router(app.db_pool.clone()))
        .layer(cors_layer(&app.config));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "shopclerk-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "system.server.stopped", "shopclerk-server stopped");

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(
            event_name = "system.server.shutdown_signal_failed",
            error = %error,
            "could not listen for shutdown signal"
        );
    }
}
