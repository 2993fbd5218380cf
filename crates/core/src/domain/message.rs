use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown message role `{other}`")))
            }
        }
    }
}

/// Per-message bookkeeping written alongside the content. Everything is
/// optional; user turns typically carry none of it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub escalated: bool,
}

/// One turn of a conversation. Immutable once persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{MessageMetadata, MessageRole};

    #[test]
    fn role_round_trips_through_strings() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            assert_eq!(MessageRole::parse(role.as_str()).expect("parse"), role);
        }
        assert!(MessageRole::parse("tool").is_err());
    }

    #[test]
    fn empty_metadata_serializes_compactly() {
        let encoded =
            serde_json::to_string(&MessageMetadata::default()).expect("serialize metadata");
        assert_eq!(encoded, "{}");
    }

    #[test]
    fn metadata_round_trip_preserves_fields() {
        let metadata = MessageMetadata {
            tokens: Some(182),
            response_time_ms: Some(910),
            model: Some("claude-sonnet-4-20250514".to_string()),
            order_number: Some("4521".to_string()),
            escalated: true,
        };

        let encoded = serde_json::to_string(&metadata).expect("serialize");
        let decoded: MessageMetadata = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, metadata);
    }
}
