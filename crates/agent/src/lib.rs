//! Agent Runtime - chat pipeline, escalation decisions, prompt assembly
//!
//! This crate provides the "brain" of the shopclerk system - the runtime that:
//! - Extracts intent and entities (order numbers, product queries) from raw
//!   customer messages
//! - Assembles the per-turn system prompt from merchant settings and fetched
//!   commerce context
//! - Calls the LLM provider and bounds its latency
//! - Decides when a conversation must be handed off to a human
//! - Dispatches merchant notifications off the response path
//!
//! # Architecture
//!
//! One inbound message runs a sequential, request-scoped pipeline:
//! 1. **Extraction** (`intent`) - Parse NL → intent tag + entities
//! 2. **Context fetch** - Best-effort order/product lookups via the commerce
//!    client
//! 3. **Prompt assembly** (`prompt`) - Pure construction of the system prompt
//! 4. **Generation** (`llm`) - Provider call with timeout and typed errors
//! 5. **Escalation** (`escalation`) - Trigger scan + weighted score, OR'd
//! 6. **Persistence** - Turns recorded through the conversation repository
//!
//! # Safety Principle
//!
//! The LLM never decides whether to escalate. That decision is deterministic:
//! fixed trigger patterns and a fixed-weight contextual score, both testable
//! without a provider in the loop.

pub mod escalation;
pub mod intent;
pub mod llm;
pub mod notify;
pub mod prompt;
pub mod runtime;

pub use escalation::{EscalationDecision, EscalationEngine, TriggerCategory};
pub use intent::{ExtractedMessage, Intent, IntentExtractor};
pub use llm::{AnthropicClient, ChatTurn, GenerateOptions, LlmClient, LlmError, LlmReply};
pub use notify::{LogNotifier, Notifier, NotifyError, SmtpNotifier};
pub use prompt::{PromptAssembler, PromptContext};
pub use runtime::{AgentRuntime, ChatOutcome, ChatRequest, PipelineError};
