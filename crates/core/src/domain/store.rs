use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotPersonality {
    #[default]
    Friendly,
    Professional,
    Efficient,
    Empathetic,
}

impl BotPersonality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friendly => "friendly",
            Self::Professional => "professional",
            Self::Efficient => "efficient",
            Self::Empathetic => "empathetic",
        }
    }
}

impl std::str::FromStr for BotPersonality {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "friendly" => Ok(Self::Friendly),
            "professional" => Ok(Self::Professional),
            "efficient" => Ok(Self::Efficient),
            "empathetic" => Ok(Self::Empathetic),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported personality `{other}` (expected friendly|professional|efficient|empathetic)"
            ))),
        }
    }
}

/// Per-merchant chatbot settings, stored as one JSON document on the store
/// row. Updates go through [`SettingsPatch`] so unknown keys are rejected at
/// the boundary instead of silently persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub welcome_message: Option<String>,
    pub return_policy: Option<String>,
    pub shipping_policy: Option<String>,
    pub support_email: Option<String>,
    pub escalation_email: Option<String>,
    pub bot_personality: BotPersonality,
    pub chatbot_enabled: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            welcome_message: None,
            return_policy: None,
            shipping_policy: None,
            support_email: None,
            escalation_email: None,
            bot_personality: BotPersonality::Friendly,
            chatbot_enabled: true,
        }
    }
}

/// Partial settings update. Every field is optional; absent fields leave the
/// stored value untouched. `deny_unknown_fields` makes a typo'd key a 400
/// instead of dead weight in the settings document.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    pub welcome_message: Option<String>,
    pub return_policy: Option<String>,
    pub shipping_policy: Option<String>,
    pub support_email: Option<String>,
    pub escalation_email: Option<String>,
    pub bot_personality: Option<BotPersonality>,
    pub chatbot_enabled: Option<bool>,
}

impl StoreSettings {
    pub fn apply_patch(&mut self, patch: SettingsPatch) {
        if let Some(welcome_message) = patch.welcome_message {
            self.welcome_message = Some(welcome_message);
        }
        if let Some(return_policy) = patch.return_policy {
            self.return_policy = Some(return_policy);
        }
        if let Some(shipping_policy) = patch.shipping_policy {
            self.shipping_policy = Some(shipping_policy);
        }
        if let Some(support_email) = patch.support_email {
            self.support_email = Some(support_email);
        }
        if let Some(escalation_email) = patch.escalation_email {
            self.escalation_email = Some(escalation_email);
        }
        if let Some(bot_personality) = patch.bot_personality {
            self.bot_personality = bot_personality;
        }
        if let Some(chatbot_enabled) = patch.chatbot_enabled {
            self.chatbot_enabled = chatbot_enabled;
        }
    }

    /// Escalation notifications go to the dedicated address when set,
    /// otherwise the general support address.
    pub fn escalation_recipient(&self) -> Option<&str> {
        self.escalation_email.as_deref().or(self.support_email.as_deref())
    }
}

/// One installed merchant. The access token is the platform credential used
/// for order/product lookups; it never appears in Debug output or logs.
#[derive(Clone, Debug)]
pub struct StoreProfile {
    pub id: i64,
    pub shop: String,
    pub access_token: SecretString,
    pub store_name: Option<String>,
    pub settings: StoreSettings,
    pub active: bool,
    pub conversation_count: i64,
    pub conversation_limit: i64,
    pub installed_at: DateTime<Utc>,
}

impl StoreProfile {
    /// Usage gate consulted before a new conversation starts. Counters are
    /// owned by billing; this is a read-only check.
    pub fn can_start_conversation(&self) -> bool {
        self.active && self.conversation_count < self.conversation_limit
    }

    pub fn display_name(&self) -> &str {
        self.store_name.as_deref().unwrap_or(self.shop.as_str())
    }
}
