use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use shopclerk_core::config::LlmConfig;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of model-visible history. The system prompt travels separately.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Clone, Copy, Debug)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { max_tokens: 1024, temperature: 1.0 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LlmReply {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub response_time_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider rate limit exceeded")]
    RateLimited,
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl LlmError {
    /// Customer-facing reply used when generation fails. Rate limits and
    /// credential problems get distinct phrasing; everything else collapses
    /// into one generic apology. Provider detail never leaks.
    pub fn fallback_reply(&self) -> &'static str {
        match self {
            Self::RateLimited => {
                "I'm helping a lot of customers right now. Please try again in a moment."
            }
            Self::Unauthorized(_) => {
                "I'm sorry, the assistant is temporarily unavailable. Please contact our support team directly."
            }
            Self::Provider(_) | Self::Transport(_) => {
                "I'm sorry, I'm having trouble processing your message right now. Please try again in a moment, or contact our support team directly."
            }
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<LlmReply, LlmError>;
}

/// Anthropic Messages API client. The HTTP timeout bounds the whole call so a
/// hung provider cannot hold a chat handler open indefinitely.
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Unauthorized("llm.api_key is not configured".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<LlmReply, LlmError> {
        let started = Instant::now();

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: options.max_tokens,
            system: system_prompt,
            messages: history
                .iter()
                .map(|turn| ApiMessage { role: turn.role.as_str(), content: &turn.content })
                .collect(),
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Unauthorized(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!("status {status}: {body}")));
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|error| LlmError::Provider(format!("malformed response: {error}")))?;

        let content = payload
            .content
            .iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text.clone())
            .ok_or_else(|| LlmError::Provider("completion carried no text block".to_string()))?;

        let response_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            event_name = "llm.generate",
            model = %payload.model,
            input_tokens = payload.usage.input_tokens,
            output_tokens = payload.usage.output_tokens,
            response_time_ms,
            "completion received"
        );

        Ok(LlmReply {
            content,
            model: payload.model,
            input_tokens: payload.usage.input_tokens,
            output_tokens: payload.usage.output_tokens,
            response_time_ms,
        })
    }
}

/// Deterministic stand-in used by pipeline and handler tests.
pub struct ScriptedClient {
    script: Script,
}

enum Script {
    Reply(String),
    RateLimited,
    Unauthorized,
    Failing,
}

impl ScriptedClient {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self { script: Script::Reply(reply.into()) }
    }

    pub fn rate_limited() -> Self {
        Self { script: Script::RateLimited }
    }

    pub fn unauthorized() -> Self {
        Self { script: Script::Unauthorized }
    }

    pub fn failing() -> Self {
        Self { script: Script::Failing }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn generate(
        &self,
        _system_prompt: &str,
        history: &[ChatTurn],
        _options: &GenerateOptions,
    ) -> Result<LlmReply, LlmError> {
        match &self.script {
            Script::Reply(content) => Ok(LlmReply {
                content: content.clone(),
                model: "scripted".to_string(),
                input_tokens: history.iter().map(|turn| turn.content.len() as u32 / 4).sum(),
                output_tokens: content.len() as u32 / 4,
                response_time_ms: 1,
            }),
            Script::RateLimited => Err(LlmError::RateLimited),
            Script::Unauthorized => Err(LlmError::Unauthorized("bad key".to_string())),
            Script::Failing => Err(LlmError::Provider("scripted failure".to_string())),
        }
    }
}
