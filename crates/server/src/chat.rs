//! Customer-facing chat API consumed by the storefront widget.
//!
//! Endpoints:
//! - `POST /api/chat`                       — one conversational turn
//! - `GET  /api/chat/conversation/{id}`     — conversation with messages
//! - `GET  /api/chat/welcome`               — greeting for a fresh session
//! - `GET  /api/analytics/summary`          — per-store conversation counters
//!
//! Input validation (message length, shop-domain shape) happens here, before
//! the pipeline runs. Every failure path returns a polite JSON body; raw
//! errors never reach the widget.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use shopclerk_agent::runtime::{AgentRuntime, ChatRequest};
use shopclerk_core::domain::conversation::{ConversationId, CustomerRef};
use shopclerk_core::domain::store::StoreProfile;
use shopclerk_core::errors::InterfaceError;
use shopclerk_db::repositories::ConversationRepository;
use shopclerk_db::StoreRepository;

const MESSAGE_MAX_CHARS: usize = 1000;

#[derive(Clone)]
pub struct ChatState {
    pub runtime: Arc<AgentRuntime>,
    pub stores: Arc<dyn StoreRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
    pub shop: String,
    #[serde(rename = "customerEmail")]
    pub customer_email: Option<String>,
    #[serde(rename = "customerName")]
    pub customer_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "needsEscalation")]
    pub needs_escalation: bool,
    pub metadata: ChatMetadata,
}

#[derive(Debug, Serialize)]
pub struct ChatMetadata {
    pub intent: String,
    #[serde(rename = "orderData", skip_serializing_if = "Option::is_none")]
    pub order_data: Option<OrderData>,
    #[serde(rename = "responseTime")]
    pub response_time: u64,
}

#[derive(Debug, Serialize)]
pub struct OrderData {
    #[serde(rename = "orderNumber")]
    pub order_number: String,
    pub status: String,
    pub total: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShopQuery {
    pub shop: String,
    #[serde(rename = "customerName")]
    pub customer_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub id: String,
    pub status: String,
    pub escalated: bool,
    #[serde(rename = "customerEmail")]
    pub customer_email: Option<String>,
    pub messages: Vec<MessageView>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub role: String,
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/api/chat", post(post_chat))
        .route("/api/chat/conversation/{id}", get(get_conversation))
        .route("/api/chat/welcome", get(get_welcome))
        .route("/api/analytics/summary", get(get_analytics))
        .with_state(state)
}

fn bad_request(message: &str) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.to_string(), reply: None }))
}

fn not_found(message: &str) -> (StatusCode, Json<ApiError>) {
    (StatusCode::NOT_FOUND, Json(ApiError { error: message.to_string(), reply: None }))
}

/// Storefront domains look like `example.myshopify.com`: one label of
/// alphanumerics and dashes, not dash-leading, under the platform suffix.
pub fn is_valid_shop_domain(shop: &str) -> bool {
    let Some(label) = shop.strip_suffix(".myshopify.com") else {
        return false;
    };

    let mut chars = label.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
}

async fn load_store(
    state: &ChatState,
    shop: &str,
) -> Result<StoreProfile, (StatusCode, Json<ApiError>)> {
    if !is_valid_shop_domain(shop) {
        warn!(event_name = "chat.invalid_shop_domain", shop, "rejected shop parameter");
        return Err(bad_request("Invalid shop domain format"));
    }

    match state.stores.find_by_shop(shop).await {
        Ok(Some(store)) if store.active => Ok(store),
        Ok(_) => Err(not_found("Store not found")),
        Err(db_error) => {
            error!(event_name = "chat.store_lookup_failed", shop, error = %db_error, "store lookup failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: "Failed to load store".to_string(),
                    reply: Some(
                        InterfaceError::Internal { message: db_error.to_string() }
                            .user_message()
                            .to_string(),
                    ),
                }),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn post_chat(
    State(state): State<ChatState>,
    Json(body): Json<ChatBody>,
) -> ApiResult<ChatResponse> {
    let message_chars = body.message.chars().count();
    if message_chars == 0 || message_chars > MESSAGE_MAX_CHARS {
        return Err(bad_request("Message must be between 1 and 1000 characters"));
    }

    let store = load_store(&state, &body.shop).await?;

    if !store.can_start_conversation() {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiError {
                error: "Conversation limit reached".to_string(),
                reply: Some(
                    "This store's conversation limit has been reached. Please contact the store directly."
                        .to_string(),
                ),
            }),
        ));
    }

    info!(
        event_name = "chat.request_received",
        shop = %store.shop,
        message_chars,
        has_conversation_id = body.conversation_id.is_some(),
        "processing chat message"
    );

    let request = ChatRequest {
        message: body.message,
        conversation_id: body.conversation_id,
        customer: CustomerRef {
            email: body.customer_email,
            name: body.customer_name,
            external_id: None,
        },
    };

    match state.runtime.handle_message(&store, request).await {
        Ok(outcome) => Ok(Json(ChatResponse {
            reply: outcome.reply,
            conversation_id: outcome.conversation_id,
            needs_escalation: outcome.needs_escalation,
            metadata: ChatMetadata {
                intent: outcome.intent.as_str().to_string(),
                order_data: outcome.order.map(|order| OrderData {
                    order_number: order.order_number,
                    status: order.status,
                    total: order.total,
                }),
                response_time: outcome.response_time_ms,
            },
        })),
        Err(pipeline_error) => {
            error!(
                event_name = "chat.request_failed",
                shop = %store.shop,
                error = %pipeline_error,
                "chat pipeline failed"
            );
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: "Failed to process message".to_string(),
                    reply: Some(
                        InterfaceError::ServiceUnavailable { message: pipeline_error.to_string() }
                            .user_message()
                            .to_string(),
                    ),
                }),
            ))
        }
    }
}

pub async fn get_conversation(
    State(state): State<ChatState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ShopQuery>,
) -> ApiResult<ConversationView> {
    let store = load_store(&state, &query.shop).await?;

    let id = ConversationId(conversation_id);
    let conversation = match state.conversations.find_by_id(&id).await {
        Ok(Some(conversation)) if conversation.store_id == store.id => conversation,
        Ok(_) => return Err(not_found("Conversation not found")),
        Err(db_error) => {
            error!(
                event_name = "chat.conversation_lookup_failed",
                error = %db_error,
                "conversation lookup failed"
            );
            return Err(not_found("Conversation not found"));
        }
    };

    let messages = state.conversations.history(&id, 100).await.unwrap_or_default();

    Ok(Json(ConversationView {
        id: conversation.id.0,
        status: conversation.status.as_str().to_string(),
        escalated: conversation.escalated,
        customer_email: conversation.customer_email,
        messages: messages
            .into_iter()
            .map(|message| MessageView {
                role: message.role.as_str().to_string(),
                content: message.content,
                created_at: message.created_at.to_rfc3339(),
            })
            .collect(),
        created_at: conversation.created_at.to_rfc3339(),
    }))
}

pub async fn get_welcome(
    State(state): State<ChatState>,
    Query(query): Query<ShopQuery>,
) -> ApiResult<WelcomeResponse> {
    let store = load_store(&state, &query.shop).await?;
    let message = state.runtime.greeting(&store, query.customer_name.as_deref());
    Ok(Json(WelcomeResponse { message }))
}

pub async fn get_analytics(
    State(state): State<ChatState>,
    Query(query): Query<ShopQuery>,
) -> ApiResult<shopclerk_db::ConversationAnalytics> {
    let store = load_store(&state, &query.shop).await?;

    match state.conversations.analytics_summary(store.id).await {
        Ok(analytics) => Ok(Json(analytics)),
        Err(db_error) => {
            error!(event_name = "chat.analytics_failed", error = %db_error, "analytics query failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError { error: "Failed to compute analytics".to_string(), reply: None }),
            ))
        }
    }
}
