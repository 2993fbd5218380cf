use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

/// One taxonomy shared by the escalation engine and the prompt assembler.
/// The engine matches these patterns against live text; the assembler renders
/// the same categories as instructions to the model, so the two can never
/// drift apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerCategory {
    /// The model itself offered to hand the conversation off.
    AssistantHandoff,
    /// The customer explicitly asked for a person.
    HumanRequest,
    /// Money, account, or security topics that a bot must not settle.
    SensitiveTopic,
    /// Frustration or legal-threat language.
    Frustration,
}

impl TriggerCategory {
    pub const ALL: [TriggerCategory; 4] =
        [Self::AssistantHandoff, Self::HumanRequest, Self::SensitiveTopic, Self::Frustration];

    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            Self::AssistantHandoff => &[
                r"connect you.*support",
                r"transfer.*human",
                r"reach out.*team",
                r"specialist.*assist",
            ],
            Self::HumanRequest => &[
                r"speak.*human",
                r"talk.*person",
                r"speak.*someone",
                r"talk.*agent",
                r"manager",
                r"supervisor",
                r"human support",
            ],
            Self::SensitiveTopic => &[
                r"refund",
                r"charge.*twice",
                r"charged.*wrong",
                r"billing.*error",
                r"fraud",
                r"dispute",
                r"chargeback",
                r"unauthorized",
                r"cancel.*subscription",
                r"delete.*account",
                r"data.*breach",
                r"hacked",
            ],
            Self::Frustration => &[
                r"this.*ridiculous",
                r"waste.*time",
                r"terrible.*service",
                r"unacceptable",
                r"lawyer",
                r"\bsue\b",
                r"better business bureau",
                r"complaint",
            ],
        }
    }

    /// Reason label written into the conversation record.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AssistantHandoff => "Assistant offered a handoff",
            Self::HumanRequest => "Customer requested a human",
            Self::SensitiveTopic => "Sensitive topic",
            Self::Frustration => "Frustration or legal threat",
        }
    }

    /// Instruction line the prompt assembler renders for this category.
    pub fn prompt_guidance(&self) -> &'static str {
        match self {
            Self::AssistantHandoff => {
                "You have already offered to hand the conversation to the team"
            }
            Self::HumanRequest => "Customer explicitly requests human support",
            Self::SensitiveTopic => {
                "Issues involving money (refunds, chargebacks, billing errors), account access, fraud, or security concerns"
            }
            Self::Frustration => "Customer is clearly frustrated or mentions legal action",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub score: u32,
    pub reasons: Vec<String>,
}

const DEFAULT_REASON: &str = "User request or sensitive topic";

impl EscalationDecision {
    /// Single free-text reason persisted on the conversation.
    pub fn reason_text(&self) -> String {
        if self.reasons.is_empty() {
            DEFAULT_REASON.to_string()
        } else {
            self.reasons.join("; ")
        }
    }
}

/// What the engine needs to know about the conversation so far. Built by the
/// caller from persisted state; the engine itself does no I/O.
#[derive(Clone, Debug, Default)]
pub struct ConversationSnapshot {
    pub message_count: i64,
    /// Most recent user turns, oldest first, including the current message.
    pub recent_user_messages: Vec<String>,
}

const LONG_CONVERSATION_THRESHOLD: i64 = 8;
const LONG_CONVERSATION_WEIGHT: u32 = 20;
const REPEATED_QUESTION_WEIGHT: u32 = 30;
const NEGATIVE_SENTIMENT_WEIGHT: u32 = 25;
const URGENCY_WEIGHT: u32 = 15;
const ESCALATION_SCORE_THRESHOLD: u32 = 40;
const SIMILARITY_THRESHOLD: f64 = 0.7;

const NEGATIVE_KEYWORDS: [&str; 10] = [
    "disappointed",
    "frustrated",
    "angry",
    "upset",
    "horrible",
    "terrible",
    "worst",
    "useless",
    "waste",
    "scam",
];

const URGENCY_KEYWORDS: [&str; 5] = ["urgent", "asap", "immediately", "emergency", "now"];

pub struct EscalationEngine {
    triggers: Vec<(TriggerCategory, Vec<Regex>)>,
}

impl Default for EscalationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EscalationEngine {
    pub fn new() -> Self {
        let triggers = TriggerCategory::ALL
            .iter()
            .map(|category| {
                let compiled = category
                    .patterns()
                    .iter()
                    .map(|pattern| {
                        Regex::new(&format!("(?i){pattern}")).expect("static pattern compiles")
                    })
                    .collect();
                (*category, compiled)
            })
            .collect();

        Self { triggers }
    }

    /// Decide whether this turn must be handed to a human. Combines a
    /// trigger-phrase scan over both sides of the exchange with a weighted
    /// contextual score; either alone is sufficient. Never fails — thin or
    /// malformed context degrades toward "do not escalate".
    pub fn evaluate(
        &self,
        user_message: &str,
        generated_reply: &str,
        snapshot: &ConversationSnapshot,
    ) -> EscalationDecision {
        let mut reasons = Vec::new();

        let combined = format!("{user_message} {generated_reply}");
        let triggered = self.matched_trigger(&combined);
        if let Some(category) = triggered {
            reasons.push(category.label().to_string());
        }

        let (score, mut contextual_reasons) = self.contextual_score(user_message, snapshot);
        reasons.append(&mut contextual_reasons);

        if snapshot.recent_user_messages.is_empty() && user_message.trim().is_empty() {
            warn!(
                event_name = "escalation.empty_input",
                "escalation evaluated with no message context"
            );
        }

        EscalationDecision {
            should_escalate: triggered.is_some() || score >= ESCALATION_SCORE_THRESHOLD,
            score,
            reasons,
        }
    }

    /// First matching category wins; presence alone forces escalation.
    pub fn matched_trigger(&self, text: &str) -> Option<TriggerCategory> {
        for (category, patterns) in &self.triggers {
            if patterns.iter().any(|pattern| pattern.is_match(text)) {
                return Some(*category);
            }
        }
        None
    }

    fn contextual_score(
        &self,
        user_message: &str,
        snapshot: &ConversationSnapshot,
    ) -> (u32, Vec<String>) {
        let mut score = 0;
        let mut reasons = Vec::new();

        if snapshot.message_count > LONG_CONVERSATION_THRESHOLD {
            score += LONG_CONVERSATION_WEIGHT;
            reasons.push("Long conversation (8+ messages)".to_string());
        }

        if has_repeated_question(&snapshot.recent_user_messages) {
            score += REPEATED_QUESTION_WEIGHT;
            reasons.push("Customer repeating similar questions".to_string());
        }

        let lowered = user_message.to_lowercase();
        if NEGATIVE_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            score += NEGATIVE_SENTIMENT_WEIGHT;
            reasons.push("Negative sentiment detected".to_string());
        }

        if URGENCY_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
            score += URGENCY_WEIGHT;
            reasons.push("Urgent request".to_string());
        }

        (score, reasons)
    }
}

/// Fixed sentence appended to the reply once a conversation escalates.
pub fn handoff_notice(customer_email: Option<&str>) -> String {
    let destination = customer_email.map(|email| format!(" at {email}")).unwrap_or_default();
    format!(
        "I understand this requires special attention from our team. I've notified our support \
         specialists about your issue, and they'll reach out to you{destination} within 24 hours. \
         Is there anything else I can help you with in the meantime?"
    )
}

/// Any pair among the last three user messages counting as near-duplicates
/// marks the customer as repeating themselves.
fn has_repeated_question(recent_user_messages: &[String]) -> bool {
    if recent_user_messages.len() < 3 {
        return false;
    }

    let last_three: Vec<String> = recent_user_messages
        .iter()
        .rev()
        .take(3)
        .map(|message| message.to_lowercase())
        .collect();

    for (index, message) in last_three.iter().enumerate() {
        for earlier in last_three.iter().skip(index + 1) {
            if jaccard_similarity(message, earlier) > SIMILARITY_THRESHOLD {
                return true;
            }
        }
    }

    false
}

/// Word-set Jaccard index over whitespace tokens.
fn jaccard_similarity(first: &str, second: &str) -> f64 {
    let first_words: HashSet<&str> = first.split_whitespace().collect();
    let second_words: HashSet<&str> = second.split_whitespace().collect();

    let union = first_words.union(&second_words).count();
    if union == 0 {
        return 0.0;
    }

    let intersection = first_words.intersection(&second_words).count();
    intersection as f64 / union as f64
}
