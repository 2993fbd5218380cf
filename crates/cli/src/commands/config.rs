use secrecy::ExposeSecret;
use shopclerk_core::config::{AppConfig, LoadOptions, LogFormat};

/// Prints the effective configuration with secrets redacted. Values reflect
/// the full precedence chain (env > file > default) the server itself uses.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "(unset)".to_string());
    let smtp_password = config
        .smtp
        .password
        .as_ref()
        .map(|password| redact_secret(password.expose_secret()))
        .unwrap_or_else(|| "(unset)".to_string());

    let format = match config.logging.format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    };

    let lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
        format!("  database.url              = {}", config.database.url),
        format!("  database.max_connections  = {}", config.database.max_connections),
        format!("  database.timeout_secs     = {}", config.database.timeout_secs),
        format!("  llm.api_key               = {api_key}"),
        format!("  llm.base_url              = {}", config.llm.base_url),
        format!("  llm.model                 = {}", config.llm.model),
        format!("  llm.timeout_secs          = {}", config.llm.timeout_secs),
        format!("  llm.max_tokens            = {}", config.llm.max_tokens),
        format!("  server.bind_address       = {}", config.server.bind_address),
        format!("  server.port               = {}", config.server.port),
        format!(
            "  server.allowed_origin     = {}",
            config.server.allowed_origin.as_deref().unwrap_or("(any)")
        ),
        format!("  smtp.enabled              = {}", config.smtp.enabled),
        format!("  smtp.host                 = {}", config.smtp.host),
        format!("  smtp.port                 = {}", config.smtp.port),
        format!("  smtp.password             = {smtp_password}"),
        format!("  smtp.from_address         = {}", config.smtp.from_address),
        format!("  commerce.api_version      = {}", config.commerce.api_version),
        format!("  commerce.timeout_secs     = {}", config.commerce.timeout_secs),
        format!("  logging.level             = {}", config.logging.level),
        format!("  logging.format            = {format}"),
    ];

    lines.join("\n")
}

fn redact_secret(value: &str) -> String {
    if value.len() <= 8 {
        return "********".to_string();
    }
    format!("{}…{}", &value[..4], &value[value.len() - 2..])
}
