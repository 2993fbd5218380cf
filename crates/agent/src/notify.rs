use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor};
use secrecy::ExposeSecret;
use tera::{Context, Tera};
use tracing::info;

use shopclerk_core::config::SmtpConfig;
use shopclerk_core::domain::conversation::Conversation;
use shopclerk_core::domain::message::Message;
use shopclerk_core::domain::store::StoreProfile;

const EMAIL_TEMPLATE_NAME: &str = "escalation_email.html";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("template rendering failed: {0}")]
    Render(String),
    #[error("smtp transport failed: {0}")]
    Transport(String),
}

/// Outbound merchant notifications. Strictly best-effort: callers dispatch in
/// the background and only ever log failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError>;
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|error| NotifyError::Transport(error.to_string()))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self { transport: builder.build(), from_address: config.from_address.clone() })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let email = Email::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| NotifyError::Address(self.from_address.clone()))?,
            )
            .to(to.parse().map_err(|_| NotifyError::Address(to.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|error| NotifyError::Transport(error.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|error| NotifyError::Transport(error.to_string()))?;

        Ok(())
    }
}

/// Used when SMTP is not configured: the notification is logged and dropped,
/// keeping development installs working without a mail relay.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), NotifyError> {
        info!(event_name = "notify.logged", to, subject, "smtp disabled, notification logged only");
        Ok(())
    }
}

/// Renders the merchant-facing escalation email. Returns `(subject, html)`.
pub fn escalation_email(
    store: &StoreProfile,
    conversation: &Conversation,
    reason: &str,
    transcript: &str,
) -> Result<(String, String), NotifyError> {
    let subject =
        format!("[{}] Support Escalation - {}", store.display_name(), conversation.id);

    let mut tera = Tera::default();
    tera.add_raw_template(EMAIL_TEMPLATE_NAME, include_str!("../templates/escalation_email.html"))
        .map_err(|error| NotifyError::Render(error.to_string()))?;

    let mut context = Context::new();
    context.insert("shop", &store.shop);
    context.insert("conversation_id", &conversation.id.0);
    context.insert("customer", conversation.customer_email.as_deref().unwrap_or("Unknown"));
    context.insert("customer_email", &conversation.customer_email);
    context.insert("message_count", &conversation.message_count);
    context.insert("reason", reason);
    context.insert("transcript", transcript);

    let html = tera
        .render(EMAIL_TEMPLATE_NAME, &context)
        .map_err(|error| NotifyError::Render(error.to_string()))?;

    Ok((subject, html))
}

/// Flattens history into the `ROLE: content` transcript embedded in the email.
pub fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.as_str().to_uppercase(), message.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
