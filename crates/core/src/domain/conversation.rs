use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("conv_{}", &suffix[..12]))
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Escalated,
    Resolved,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "active" => Ok(Self::Active),
            "escalated" => Ok(Self::Escalated),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown conversation status `{other}`"
            ))),
        }
    }
}

/// Customer identity attached to a conversation. All fields optional — the
/// storefront widget often has no identity at all for a first message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CustomerRef {
    pub email: Option<String>,
    pub name: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub store_id: i64,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub customer_external_id: Option<String>,
    pub status: ConversationStatus,
    pub escalated: bool,
    pub escalation_reason: Option<String>,
    pub metadata: Map<String, Value>,
    pub message_count: i64,
    pub last_message_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(store_id: i64, customer: CustomerRef) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::generate(),
            store_id,
            customer_email: customer.email,
            customer_name: customer.name,
            customer_external_id: customer.external_id,
            status: ConversationStatus::Active,
            escalated: false,
            escalation_reason: None,
            metadata: Map::new(),
            message_count: 0,
            last_message_at: now,
            resolved_at: None,
            created_at: now,
        }
    }

    /// Hand the conversation off to a human. Status and the escalated flag
    /// always change together; a conversation can never carry
    /// `escalated = true` with any other status.
    pub fn escalate(&mut self, reason: impl Into<String>) {
        self.escalated = true;
        self.status = ConversationStatus::Escalated;
        self.escalation_reason = Some(reason.into());
    }

    pub fn resolve(&mut self) -> Result<(), DomainError> {
        if self.status == ConversationStatus::Closed {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: ConversationStatus::Resolved,
            });
        }
        self.status = ConversationStatus::Resolved;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    pub fn merge_metadata(&mut self, extra: Map<String, Value>) {
        for (key, value) in extra {
            self.metadata.insert(key, value);
        }
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }
}
