use std::sync::Arc;
use std::time::Instant;

use serde_json::Map;
use tracing::{error, info, warn};

use shopclerk_commerce::CommerceApi;
use shopclerk_core::domain::commerce::{OrderRecord, ProductRecord};
use shopclerk_core::domain::conversation::{Conversation, CustomerRef};
use shopclerk_core::domain::message::{Message, MessageMetadata, MessageRole};
use shopclerk_core::domain::store::StoreProfile;
use shopclerk_db::repositories::ConversationRepository;
use shopclerk_db::StoreRepository;

use crate::escalation::{handoff_notice, ConversationSnapshot, EscalationEngine};
use crate::intent::{Intent, IntentExtractor};
use crate::llm::{ChatTurn, GenerateOptions, LlmClient, LlmReply, TurnRole};
use crate::notify::{escalation_email, transcript, Notifier};
use crate::prompt::{format_history, PromptAssembler, PromptContext};

/// Model-visible history is capped; older turns age out of the prompt but
/// stay persisted.
const HISTORY_LIMIT: i64 = 20;

#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub customer: CustomerRef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderSummary {
    pub order_number: String,
    pub status: String,
    pub total: String,
}

#[derive(Clone, Debug)]
pub struct ChatOutcome {
    pub reply: String,
    pub conversation_id: String,
    pub needs_escalation: bool,
    pub intent: Intent,
    pub order: Option<OrderSummary>,
    pub response_time_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Conversation state could not be established or the inbound turn could
    /// not be recorded; the turn must fail because persisted state is the
    /// source of truth.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// One request-scoped pipeline per inbound message: extract entities, fetch
/// commerce context, assemble the prompt, generate, evaluate escalation,
/// persist, reply. Everything after recording the user turn degrades rather
/// than failing the request.
pub struct AgentRuntime {
    extractor: IntentExtractor,
    escalation: EscalationEngine,
    assembler: PromptAssembler,
    llm: Arc<dyn LlmClient>,
    commerce: Arc<dyn CommerceApi>,
    conversations: Arc<dyn ConversationRepository>,
    stores: Arc<dyn StoreRepository>,
    notifier: Arc<dyn Notifier>,
    generate_options: GenerateOptions,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        commerce: Arc<dyn CommerceApi>,
        conversations: Arc<dyn ConversationRepository>,
        stores: Arc<dyn StoreRepository>,
        notifier: Arc<dyn Notifier>,
        generate_options: GenerateOptions,
    ) -> Self {
        Self {
            extractor: IntentExtractor::new(),
            escalation: EscalationEngine::new(),
            assembler: PromptAssembler::new(),
            llm,
            commerce,
            conversations,
            stores,
            notifier,
            generate_options,
        }
    }

    pub fn greeting(&self, store: &StoreProfile, customer_name: Option<&str>) -> String {
        self.assembler.greeting(store.display_name(), &store.settings, customer_name)
    }

    pub async fn handle_message(
        &self,
        store: &StoreProfile,
        request: ChatRequest,
    ) -> Result<ChatOutcome, PipelineError> {
        let started = Instant::now();

        let conversation = self
            .conversations
            .get_or_create(request.conversation_id.as_deref(), store.id, &request.customer)
            .await
            .map_err(|error| PipelineError::Persistence(error.to_string()))?;
        let is_new_conversation = conversation.message_count == 0;

        self.conversations
            .append_message(
                &conversation.id,
                MessageRole::User,
                &request.message,
                &MessageMetadata::default(),
            )
            .await
            .map_err(|error| PipelineError::Persistence(error.to_string()))?;

        let extracted = self.extractor.extract(&request.message);
        info!(
            event_name = "chat.message_analyzed",
            conversation_id = %conversation.id,
            shop = %store.shop,
            intent = extracted.intent.as_str(),
            has_order_number = extracted.order_number.is_some(),
            has_product_query = extracted.product_query.is_some(),
            "inbound message analyzed"
        );

        let order_data = match &extracted.order_number {
            Some(order_number) => self.fetch_order(store, &conversation, order_number).await,
            None => None,
        };
        let product_data = match &extracted.product_query {
            Some(query) => self.fetch_products(store, query).await,
            None => Vec::new(),
        };

        let history = match self.conversations.history(&conversation.id, HISTORY_LIMIT).await {
            Ok(history) => history,
            Err(error) => {
                warn!(
                    event_name = "chat.history_unavailable",
                    conversation_id = %conversation.id,
                    error = %error,
                    "continuing with current turn only"
                );
                Vec::new()
            }
        };

        let message_count = conversation.message_count + 1;
        let system_prompt = self.assembler.build(PromptContext {
            store_name: store.display_name(),
            settings: Some(&store.settings),
            order: order_data.as_ref(),
            products: &product_data,
            message_count,
        });

        let mut turns = format_history(&history);
        if turns.is_empty() {
            turns.push(ChatTurn { role: TurnRole::User, content: request.message.clone() });
        }

        let reply = match self.llm.generate(&system_prompt, &turns, &self.generate_options).await {
            Ok(reply) => reply,
            Err(llm_error) => {
                error!(
                    event_name = "chat.generation_failed",
                    conversation_id = %conversation.id,
                    error = %llm_error,
                    "falling back to apology reply"
                );
                LlmReply {
                    content: llm_error.fallback_reply().to_string(),
                    model: String::new(),
                    input_tokens: 0,
                    output_tokens: 0,
                    response_time_ms: 0,
                }
            }
        };

        let snapshot = ConversationSnapshot {
            message_count,
            recent_user_messages: history
                .iter()
                .filter(|message| message.role == MessageRole::User)
                .map(|message| message.content.clone())
                .collect(),
        };
        let decision = self.escalation.evaluate(&request.message, &reply.content, &snapshot);

        let mut final_reply = reply.content.clone();
        if decision.should_escalate {
            let reason = decision.reason_text();
            if let Err(persist_error) = self.conversations.escalate(&conversation.id, &reason).await
            {
                error!(
                    event_name = "chat.escalation_not_persisted",
                    conversation_id = %conversation.id,
                    error = %persist_error,
                    "escalation state lost; reply still returned"
                );
            }

            final_reply.push_str("\n\n");
            final_reply.push_str(&handoff_notice(conversation.customer_email.as_deref()));

            // One notification per conversation: a thread that already
            // escalated stays silent on subsequent trigger hits.
            if !conversation.is_escalated() {
                self.dispatch_notification(store, &conversation, &reason, &history, &final_reply);
            }

            info!(
                event_name = "chat.escalated",
                conversation_id = %conversation.id,
                shop = %store.shop,
                score = decision.score,
                reason = %reason,
                "conversation handed off"
            );
        }

        let assistant_metadata = MessageMetadata {
            tokens: Some(reply.output_tokens),
            response_time_ms: Some(reply.response_time_ms),
            model: (!reply.model.is_empty()).then(|| reply.model.clone()),
            order_number: order_data.as_ref().map(|order| order.number().to_string()),
            escalated: decision.should_escalate,
        };
        if let Err(persist_error) = self
            .conversations
            .append_message(
                &conversation.id,
                MessageRole::Assistant,
                &final_reply,
                &assistant_metadata,
            )
            .await
        {
            // Trade durability for the customer experience: the reply is
            // already generated, so return it and log loudly.
            error!(
                event_name = "chat.reply_not_persisted",
                conversation_id = %conversation.id,
                error = %persist_error,
                "assistant turn lost"
            );
        }

        if is_new_conversation {
            if let Err(count_error) = self.stores.increment_conversation_count(store.id).await {
                warn!(
                    event_name = "chat.usage_count_not_bumped",
                    shop = %store.shop,
                    error = %count_error,
                    "conversation counter unchanged"
                );
            }
        }

        Ok(ChatOutcome {
            reply: final_reply,
            conversation_id: conversation.id.0.clone(),
            needs_escalation: decision.should_escalate,
            intent: extracted.intent,
            order: order_data.as_ref().map(|order| OrderSummary {
                order_number: order.number().to_string(),
                status: order
                    .fulfillment_status
                    .clone()
                    .unwrap_or_else(|| "Processing".to_string()),
                total: order.total_price.clone(),
            }),
            response_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn fetch_order(
        &self,
        store: &StoreProfile,
        conversation: &Conversation,
        order_number: &str,
    ) -> Option<OrderRecord> {
        match self.commerce.fetch_order(&store.shop, &store.access_token, order_number).await {
            Ok(Some(order)) => {
                let mut extra = Map::new();
                extra.insert("orderNumber".to_string(), order_number.into());
                extra.insert("orderId".to_string(), order.id.into());
                if let Err(error) = self.conversations.merge_metadata(&conversation.id, extra).await
                {
                    warn!(
                        event_name = "chat.metadata_not_updated",
                        conversation_id = %conversation.id,
                        error = %error,
                        "order context not recorded on conversation"
                    );
                }
                Some(order)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(
                    event_name = "chat.order_lookup_failed",
                    shop = %store.shop,
                    order_number,
                    error = %error,
                    "continuing without order context"
                );
                None
            }
        }
    }

    async fn fetch_products(&self, store: &StoreProfile, query: &str) -> Vec<ProductRecord> {
        match self.commerce.fetch_products(&store.shop, &store.access_token, query).await {
            Ok(products) => products,
            Err(error) => {
                warn!(
                    event_name = "chat.product_lookup_failed",
                    shop = %store.shop,
                    query,
                    error = %error,
                    "continuing without product context"
                );
                Vec::new()
            }
        }
    }

    /// Fire-and-forget: the handler never awaits delivery, and a scheduled
    /// notification runs to completion even if the caller disconnects.
    fn dispatch_notification(
        &self,
        store: &StoreProfile,
        conversation: &Conversation,
        reason: &str,
        history: &[Message],
        final_reply: &str,
    ) {
        let Some(recipient) = store.settings.escalation_recipient() else {
            warn!(
                event_name = "chat.no_escalation_recipient",
                shop = %store.shop,
                "no escalation or support email configured"
            );
            return;
        };

        let mut full_transcript = transcript(history);
        if !full_transcript.is_empty() {
            full_transcript.push_str("\n\n");
        }
        full_transcript.push_str(&format!("ASSISTANT: {final_reply}"));

        let rendered = match escalation_email(store, conversation, reason, &full_transcript) {
            Ok(rendered) => rendered,
            Err(error) => {
                error!(
                    event_name = "chat.notification_render_failed",
                    conversation_id = %conversation.id,
                    error = %error,
                    "escalation email not sent"
                );
                return;
            }
        };

        let notifier = Arc::clone(&self.notifier);
        let recipient = recipient.to_string();
        let conversation_id = conversation.id.0.clone();
        tokio::spawn(async move {
            let (subject, html) = rendered;
            if let Err(error) = notifier.notify(&recipient, &subject, &html).await {
                error!(
                    event_name = "chat.notification_failed",
                    conversation_id = %conversation_id,
                    error = %error,
                    "escalation email not delivered"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use secrecy::SecretString;
    use tokio::sync::Mutex;

    use shopclerk_commerce::{CommerceApi, StaticCommerce};
    use shopclerk_core::domain::commerce::{Fulfillment, LineItem, OrderRecord};
    use shopclerk_core::domain::conversation::{ConversationId, ConversationStatus, CustomerRef};
    use shopclerk_core::domain::message::MessageRole;
    use shopclerk_core::domain::store::{StoreProfile, StoreSettings};
    use shopclerk_db::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryStoreRepository,
        StoreRepository,
    };

    use super::{AgentRuntime, ChatRequest};
    use crate::llm::{GenerateOptions, LlmClient, ScriptedClient};
    use crate::notify::{Notifier, NotifyError};

    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            to: &str,
            subject: &str,
            _html_body: &str,
        ) -> Result<(), NotifyError> {
            self.sent.lock().await.push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    fn store() -> StoreProfile {
        StoreProfile {
            id: 1,
            shop: "demo.myshopify.com".to_string(),
            access_token: SecretString::from("shpat_test".to_string()),
            store_name: Some("Demo Outfitters".to_string()),
            settings: StoreSettings {
                support_email: Some("help@demo.example".to_string()),
                ..StoreSettings::default()
            },
            active: true,
            conversation_count: 0,
            conversation_limit: 1000,
            installed_at: Utc::now(),
        }
    }

    struct Harness {
        runtime: AgentRuntime,
        conversations: Arc<InMemoryConversationRepository>,
        stores: Arc<InMemoryStoreRepository>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(llm: ScriptedClient, commerce: StaticCommerce) -> Harness {
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let stores = Arc::new(InMemoryStoreRepository::default());
        let notifier = Arc::new(RecordingNotifier { sent: Mutex::new(Vec::new()) });

        let runtime = AgentRuntime::new(
            Arc::new(llm) as Arc<dyn LlmClient>,
            Arc::new(commerce) as Arc<dyn CommerceApi>,
            Arc::clone(&conversations) as Arc<dyn ConversationRepository>,
            Arc::clone(&stores) as Arc<dyn StoreRepository>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            GenerateOptions::default(),
        );

        Harness { runtime, conversations, stores, notifier }
    }

    fn fulfilled_order() -> OrderRecord {
        OrderRecord {
            id: 9001,
            name: "#4521".to_string(),
            created_at: Utc::now(),
            financial_status: "paid".to_string(),
            fulfillment_status: Some("fulfilled".to_string()),
            currency: "USD".to_string(),
            total_price: "89.90".to_string(),
            line_items: vec![LineItem { quantity: 1, name: "Trail Sock".to_string() }],
            fulfillments: vec![Fulfillment {
                status: "success".to_string(),
                tracking_number: Some("1Z999".to_string()),
                tracking_url: None,
            }],
        }
    }

    #[tokio::test]
    async fn happy_path_persists_both_turns_and_skips_escalation() {
        let harness = harness(
            ScriptedClient::replying("Your order shipped and is on its way."),
            StaticCommerce { order: Some(fulfilled_order()), ..StaticCommerce::default() },
        );

        let outcome = harness
            .runtime
            .handle_message(
                &store(),
                ChatRequest { message: "Where's order #4521".to_string(), ..Default::default() },
            )
            .await
            .expect("pipeline succeeds");

        assert!(!outcome.needs_escalation);
        assert_eq!(outcome.intent.as_str(), "order_tracking");
        assert_eq!(outcome.reply, "Your order shipped and is on its way.");
        assert!(!outcome.reply.contains("special attention"));

        let summary = outcome.order.expect("order summary present");
        assert_eq!(summary.order_number, "4521");
        assert_eq!(summary.status, "fulfilled");

        let conversation_id = ConversationId(outcome.conversation_id.clone());
        let history = harness.conversations.history(&conversation_id, 20).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert_eq!(history[1].metadata.order_number.as_deref(), Some("4521"));

        let conversation = harness
            .conversations
            .find_by_id(&conversation_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(conversation.message_count, 2);
        assert_eq!(conversation.metadata["orderNumber"], "4521");
        assert!(harness.notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn angry_refund_demand_escalates_and_notifies() {
        let harness = harness(
            ScriptedClient::replying("I'm sorry to hear that."),
            StaticCommerce::default(),
        );

        let outcome = harness
            .runtime
            .handle_message(
                &store(),
                ChatRequest {
                    message: "This is ridiculous, I want a refund now, get me a manager"
                        .to_string(),
                    customer: CustomerRef {
                        email: Some("shopper@example.com".to_string()),
                        ..CustomerRef::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .expect("pipeline succeeds");

        assert!(outcome.needs_escalation);
        assert!(outcome.reply.contains("special attention"));
        assert!(outcome.reply.contains("shopper@example.com"));

        let conversation_id = ConversationId(outcome.conversation_id.clone());
        let conversation = harness
            .conversations
            .find_by_id(&conversation_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(conversation.status, ConversationStatus::Escalated);
        assert!(conversation.escalated);
        assert!(conversation.escalation_reason.is_some());

        // Let the fire-and-forget notification task run.
        tokio::task::yield_now().await;
        let sent = harness.notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "help@demo.example");
        assert!(sent[0].1.contains("Support Escalation"));
    }

    #[tokio::test]
    async fn already_escalated_conversation_sends_no_second_notification() {
        let harness = harness(
            ScriptedClient::replying("Our team will be in touch."),
            StaticCommerce::default(),
        );
        let store = store();

        let conversation = harness
            .conversations
            .get_or_create(None, store.id, &CustomerRef::default())
            .await
            .expect("create conversation");
        harness
            .conversations
            .escalate(&conversation.id, "Customer requested a human")
            .await
            .expect("pre-escalate");

        let outcome = harness
            .runtime
            .handle_message(
                &store,
                ChatRequest {
                    message: "I still want to speak to a manager".to_string(),
                    conversation_id: Some(conversation.id.0.clone()),
                    ..Default::default()
                },
            )
            .await
            .expect("pipeline succeeds");

        assert!(outcome.needs_escalation);
        tokio::task::yield_now().await;
        assert!(harness.notifier.sent.lock().await.is_empty(), "notification deduplicated");
    }

    #[tokio::test]
    async fn llm_rate_limit_yields_retry_reply_not_an_error() {
        let harness = harness(ScriptedClient::rate_limited(), StaticCommerce::default());

        let outcome = harness
            .runtime
            .handle_message(
                &store(),
                ChatRequest { message: "hello there".to_string(), ..Default::default() },
            )
            .await
            .expect("pipeline still succeeds");

        assert!(outcome.reply.contains("try again in a moment"));
        assert!(!outcome.needs_escalation);

        let conversation_id = ConversationId(outcome.conversation_id.clone());
        let history = harness.conversations.history(&conversation_id, 20).await.expect("history");
        assert_eq!(history.len(), 2, "apology reply is persisted like any assistant turn");
        assert_eq!(history[1].metadata.model, None);
    }

    #[tokio::test]
    async fn commerce_failure_degrades_to_no_order_context() {
        let harness = harness(
            ScriptedClient::replying("Happy to help with your order."),
            StaticCommerce { fail: true, ..StaticCommerce::default() },
        );

        let outcome = harness
            .runtime
            .handle_message(
                &store(),
                ChatRequest { message: "where is order #4521".to_string(), ..Default::default() },
            )
            .await
            .expect("pipeline succeeds");

        assert!(outcome.order.is_none());
        assert_eq!(outcome.intent.as_str(), "order_tracking");
    }

    #[tokio::test]
    async fn new_conversations_bump_the_store_counter_once() {
        let harness = harness(ScriptedClient::replying("Hello!"), StaticCommerce::default());
        let store_profile = store();
        harness.stores.insert_profile(store_profile.clone()).await;

        let first = harness
            .runtime
            .handle_message(
                &store_profile,
                ChatRequest { message: "hi".to_string(), ..Default::default() },
            )
            .await
            .expect("first turn");

        harness
            .runtime
            .handle_message(
                &store_profile,
                ChatRequest {
                    message: "one more question".to_string(),
                    conversation_id: Some(first.conversation_id.clone()),
                    ..Default::default()
                },
            )
            .await
            .expect("second turn");

        let stored = harness
            .stores
            .find_by_shop("demo.myshopify.com")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.conversation_count, 1);
    }
}
