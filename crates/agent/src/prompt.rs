use shopclerk_core::domain::commerce::{OrderRecord, ProductRecord};
use shopclerk_core::domain::message::{Message, MessageRole};
use shopclerk_core::domain::store::{BotPersonality, StoreSettings};

use crate::escalation::TriggerCategory;
use crate::llm::{ChatTurn, TurnRole};

/// Product descriptions are merchant HTML; the prompt gets a flat excerpt.
const PRODUCT_DESCRIPTION_CHARS: usize = 200;
const MAX_PROMPT_PRODUCTS: usize = 3;

/// Conversations past this many messages get a summarize-or-escalate note.
const EXTENDED_CONVERSATION_THRESHOLD: i64 = 5;

const FALLBACK_RETURN_POLICY: &str = "Please contact support for return information.";
const FALLBACK_SHIPPING_POLICY: &str = "Please contact support for shipping information.";
const FALLBACK_SUPPORT_EMAIL: &str = "support@store.com";

#[derive(Clone, Copy, Debug, Default)]
pub struct PromptContext<'a> {
    pub store_name: &'a str,
    pub settings: Option<&'a StoreSettings>,
    pub order: Option<&'a OrderRecord>,
    pub products: &'a [ProductRecord],
    pub message_count: i64,
}

/// Builds the per-turn system instruction. Pure: identical inputs always
/// produce byte-identical output, so assembled prompts are testable and could
/// be cached.
#[derive(Clone, Copy, Debug, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, context: PromptContext<'_>) -> String {
        let default_settings = StoreSettings::default();
        let settings = context.settings.unwrap_or(&default_settings);

        let mut prompt = format!(
            "You are a helpful customer support agent for {}.\n\n",
            if context.store_name.is_empty() { "this store" } else { context.store_name }
        );

        prompt.push_str(&format!(
            "PERSONALITY: {} - {}\n\n",
            settings.bot_personality.as_str(),
            personality_clause(settings.bot_personality)
        ));

        prompt.push_str("STORE POLICIES:\n");
        prompt.push_str(&format!(
            "- Return Policy: {}\n",
            settings.return_policy.as_deref().unwrap_or(FALLBACK_RETURN_POLICY)
        ));
        prompt.push_str(&format!(
            "- Shipping Policy: {}\n",
            settings.shipping_policy.as_deref().unwrap_or(FALLBACK_SHIPPING_POLICY)
        ));
        prompt.push_str(&format!(
            "- Support Email: {}\n\n",
            settings.support_email.as_deref().unwrap_or(FALLBACK_SUPPORT_EMAIL)
        ));

        prompt.push_str(
            "INSTRUCTIONS:\n\
             - Be helpful, empathetic, and solution-oriented\n\
             - Keep responses concise (2-4 sentences unless a detailed explanation is needed)\n\
             - If you don't have specific information, be honest and offer to escalate\n\
             - Never make up order information - only use data provided to you\n\
             - Use emojis sparingly (max 1-2 per response) and only when appropriate\n\n",
        );

        prompt.push_str("ESCALATION TRIGGERS (always hand off to human support when one applies):\n");
        for category in TriggerCategory::ALL {
            prompt.push_str(&format!("- {}\n", category.prompt_guidance()));
        }
        prompt.push_str(
            "\nWhen you need to escalate, respond with: \"I understand this requires special \
             attention. Let me connect you with our support team who can better assist you.\"\n",
        );

        if context.message_count > EXTENDED_CONVERSATION_THRESHOLD {
            prompt.push_str(&format!(
                "\nNOTE: This is an extended conversation ({} messages). Consider summarizing or \
                 offering to escalate if the issue isn't resolving.\n",
                context.message_count
            ));
        }

        if let Some(order) = context.order {
            prompt.push_str(&order_block(order));
        }

        if !context.products.is_empty() {
            prompt.push_str(&product_block(context.products));
        }

        prompt
    }

    /// Welcome message for a fresh widget session. Uses the merchant's stored
    /// greeting when present, personalized with the customer's name.
    pub fn greeting(
        &self,
        store_name: &str,
        settings: &StoreSettings,
        customer_name: Option<&str>,
    ) -> String {
        if let Some(welcome) = settings.welcome_message.as_deref() {
            if let Some(name) = customer_name {
                return welcome.replace("Hi!", &format!("Hi {name}!"));
            }
            return welcome.to_string();
        }

        let salutation = match customer_name {
            Some(name) => format!("Hi {name}!"),
            None => "Hi there!".to_string(),
        };
        let store = if store_name.is_empty() { "our store" } else { store_name };
        format!(
            "{salutation} \u{1F44B} Welcome to {store}. I'm here to help with any questions about \
             orders, returns, or products. How can I assist you today?"
        )
    }
}

/// Maps stored history to model turns, preserving order. Anything that is not
/// an assistant turn collapses to `user` so an unexpected stored role can
/// never corrupt the provider request.
pub fn format_history(messages: &[Message]) -> Vec<ChatTurn> {
    messages
        .iter()
        .map(|message| ChatTurn {
            role: match message.role {
                MessageRole::Assistant => TurnRole::Assistant,
                MessageRole::User | MessageRole::System => TurnRole::User,
            },
            content: message.content.clone(),
        })
        .collect()
}

fn personality_clause(personality: BotPersonality) -> &'static str {
    match personality {
        BotPersonality::Friendly => {
            "Be warm and conversational, with a casual tone. Use emojis occasionally (1-2 per response) to seem approachable."
        }
        BotPersonality::Professional => {
            "Be polite, formal, and precise. Avoid emojis and casual language."
        }
        BotPersonality::Efficient => {
            "Be direct and solution-focused. Get to the point quickly with minimal small talk."
        }
        BotPersonality::Empathetic => {
            "Be understanding and patient. Validate the customer's feelings before solving the problem."
        }
    }
}

fn order_block(order: &OrderRecord) -> String {
    let mut block = String::from("\nCURRENT ORDER INFORMATION:\n");
    block.push_str(&format!("- Order Number: {}\n", order.number()));
    block.push_str(&format!("- Order Date: {}\n", order.created_at.format("%Y-%m-%d")));
    block.push_str(&format!(
        "- Status: {} / {}\n",
        order.financial_status,
        order.fulfillment_status.as_deref().unwrap_or("Unfulfilled")
    ));
    block.push_str(&format!("- Total: {} {}\n", order.currency, order.total_price));

    let items = order
        .line_items
        .iter()
        .map(|item| format!("{}x {}", item.quantity, item.name))
        .collect::<Vec<_>>()
        .join(", ");
    block.push_str(&format!("- Items: {items}\n"));

    if let Some(fulfillment) = order.fulfillments.first() {
        block.push_str(&format!("- Shipping Status: {}\n", fulfillment.status));
        if let Some(tracking_number) = &fulfillment.tracking_number {
            block.push_str(&format!("- Tracking Number: {tracking_number}\n"));
            if let Some(tracking_url) = &fulfillment.tracking_url {
                block.push_str(&format!("- Track Package: {tracking_url}\n"));
            }
        }
    } else {
        block.push_str("- Shipping: Order is being prepared for shipment\n");
    }

    block
}

fn product_block(products: &[ProductRecord]) -> String {
    let mut block = String::from("\nRELEVANT PRODUCTS:\n");
    for product in products.iter().take(MAX_PROMPT_PRODUCTS) {
        let description = product
            .body_html
            .as_deref()
            .map(|html| truncate_chars(&strip_html(html), PRODUCT_DESCRIPTION_CHARS))
            .unwrap_or_default();
        block.push_str(&format!("- {}: {}", product.title, description));
        if let Some(price) = product.first_variant_price() {
            block.push_str(&format!(" (Price: {price})"));
        }
        block.push('\n');
    }
    block
}

/// Drops anything between `<` and `>`. Merchant descriptions are simple
/// storefront HTML; a tag-level strip is all the prompt needs.
fn strip_html(html: &str) -> String {
    let mut output = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            other if !in_tag => output.push(other),
            _ => {}
        }
    }
    output
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shopclerk_core::domain::commerce::{
        Fulfillment, LineItem, OrderRecord, ProductRecord, ProductVariant,
    };
    use shopclerk_core::domain::conversation::ConversationId;
    use shopclerk_core::domain::message::{Message, MessageMetadata, MessageRole};
    use shopclerk_core::domain::store::{BotPersonality, StoreSettings};

    use super::{format_history, strip_html, truncate_chars, PromptAssembler, PromptContext};
    use crate::llm::TurnRole;

    fn fulfilled_order() -> OrderRecord {
        OrderRecord {
            id: 9001,
            name: "#4521".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 7, 2, 9, 15, 0).unwrap(),
            financial_status: "paid".to_string(),
            fulfillment_status: Some("fulfilled".to_string()),
            currency: "USD".to_string(),
            total_price: "89.90".to_string(),
            line_items: vec![
                LineItem { quantity: 2, name: "Trail Sock".to_string() },
                LineItem { quantity: 1, name: "Cap".to_string() },
            ],
            fulfillments: vec![Fulfillment {
                status: "success".to_string(),
                tracking_number: Some("1Z999".to_string()),
                tracking_url: Some("https://track.example/1Z999".to_string()),
            }],
        }
    }

    #[test]
    fn identical_inputs_produce_identical_prompts() {
        let assembler = PromptAssembler::new();
        let settings = StoreSettings::default();
        let context = PromptContext {
            store_name: "Demo Outfitters",
            settings: Some(&settings),
            ..PromptContext::default()
        };

        assert_eq!(assembler.build(context), assembler.build(context));
    }

    #[test]
    fn base_prompt_carries_policies_and_escalation_block() {
        let settings = StoreSettings {
            return_policy: Some("30 days, unworn.".to_string()),
            support_email: Some("help@demo.example".to_string()),
            bot_personality: BotPersonality::Professional,
            ..StoreSettings::default()
        };
        let prompt = PromptAssembler::new().build(PromptContext {
            store_name: "Demo Outfitters",
            settings: Some(&settings),
            ..PromptContext::default()
        });

        assert!(prompt.contains("customer support agent for Demo Outfitters"));
        assert!(prompt.contains("PERSONALITY: professional"));
        assert!(prompt.contains("- Return Policy: 30 days, unworn."));
        assert!(prompt.contains("- Shipping Policy: Please contact support"));
        assert!(prompt.contains("- Support Email: help@demo.example"));
        assert!(prompt.contains("ESCALATION TRIGGERS"));
        assert!(prompt.contains("Customer explicitly requests human support"));
        assert!(prompt.contains("Never make up order information"));
    }

    #[test]
    fn order_block_includes_tracking_details() {
        let order = fulfilled_order();
        let prompt = PromptAssembler::new().build(PromptContext {
            store_name: "Demo Outfitters",
            order: Some(&order),
            ..PromptContext::default()
        });

        assert!(prompt.contains("Order Number: 4521"));
        assert!(prompt.contains("Order Date: 2026-07-02"));
        assert!(prompt.contains("Status: paid / fulfilled"));
        assert!(prompt.contains("Total: USD 89.90"));
        assert!(prompt.contains("Items: 2x Trail Sock, 1x Cap"));
        assert!(prompt.contains("Tracking Number: 1Z999"));
        assert!(prompt.contains("Track Package: https://track.example/1Z999"));
    }

    #[test]
    fn unfulfilled_order_gets_preparing_line() {
        let order = OrderRecord { fulfillments: Vec::new(), ..fulfilled_order() };
        let prompt = PromptAssembler::new()
            .build(PromptContext { order: Some(&order), ..PromptContext::default() });

        assert!(prompt.contains("being prepared for shipment"));
        assert!(!prompt.contains("Tracking Number"));
    }

    #[test]
    fn product_block_strips_html_and_truncates() {
        let products = vec![ProductRecord {
            id: 1,
            title: "Trail Sock".to_string(),
            body_html: Some(format!("<p>Merino blend.</p><b>{}</b>", "x".repeat(400))),
            product_type: None,
            variants: vec![ProductVariant { price: "14.50".to_string() }],
        }];

        let prompt = PromptAssembler::new()
            .build(PromptContext { products: &products, ..PromptContext::default() });

        assert!(prompt.contains("- Trail Sock: Merino blend."));
        assert!(prompt.contains("(Price: 14.50)"));
        assert!(!prompt.contains('<'));
        // 200-char cap on the stripped description
        assert!(!prompt.contains(&"x".repeat(250)));
    }

    #[test]
    fn extended_conversations_add_wrap_up_note() {
        let assembler = PromptAssembler::new();
        let short = assembler
            .build(PromptContext { message_count: 4, ..PromptContext::default() });
        let long = assembler
            .build(PromptContext { message_count: 11, ..PromptContext::default() });

        assert!(!short.contains("extended conversation"));
        assert!(long.contains("extended conversation (11 messages)"));
    }

    #[test]
    fn history_collapses_unknown_roles_to_user() {
        let conversation_id = ConversationId("conv_test".to_string());
        let message = |role, content: &str| Message {
            id: 0,
            conversation_id: conversation_id.clone(),
            role,
            content: content.to_string(),
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        };

        let turns = format_history(&[
            message(MessageRole::User, "where is my order"),
            message(MessageRole::Assistant, "let me check"),
            message(MessageRole::System, "internal note"),
        ]);

        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[2].role, TurnRole::User);
        assert_eq!(turns[1].content, "let me check");
    }

    #[test]
    fn greeting_personalizes_stored_welcome_message() {
        let assembler = PromptAssembler::new();
        let settings = StoreSettings {
            welcome_message: Some("Hi! Welcome to Demo Outfitters.".to_string()),
            ..StoreSettings::default()
        };

        assert_eq!(
            assembler.greeting("Demo Outfitters", &settings, Some("Sam")),
            "Hi Sam! Welcome to Demo Outfitters."
        );
        assert_eq!(
            assembler.greeting("Demo Outfitters", &settings, None),
            "Hi! Welcome to Demo Outfitters."
        );
    }

    #[test]
    fn greeting_falls_back_to_default_when_unset() {
        let greeting =
            PromptAssembler::new().greeting("Demo Outfitters", &StoreSettings::default(), None);
        assert!(greeting.starts_with("Hi there!"));
        assert!(greeting.contains("Welcome to Demo Outfitters"));
    }

    #[test]
    fn strip_html_and_truncate_behave() {
        assert_eq!(strip_html("<p>plain <b>bold</b></p>"), "plain bold");
        assert_eq!(strip_html("no tags"), "no tags");
        assert_eq!(truncate_chars("abcdef", 4), "abcd");
        assert_eq!(truncate_chars("ab", 4), "ab");
    }
}
