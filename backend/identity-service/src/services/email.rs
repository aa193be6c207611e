/// Email service and the welcome mail outbox handler
use crate::config::EmailSettings;
use crate::error::{IdentityError, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use transactional_outbox::{MessageHandler, OutboxMessage};
use uuid::Uuid;

/// Outgoing mail seam, so handlers can run against a fake sender in tests.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_html_email(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()>;
}

/// Async email transport wrapper (SMTP or no-op)
#[derive(Clone)]
pub struct EmailService {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl EmailService {
    /// Build email service from configuration
    ///
    /// If SMTP host is empty, operates in no-op mode (logs only).
    pub fn new(config: &EmailSettings) -> Result<Self> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| IdentityError::Email(format!("Invalid SMTP_FROM address: {}", e)))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; email service will operate in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| IdentityError::Email(format!("Failed to configure SMTP transport: {}", e)))?
            .port(config.smtp_port);

            let builder = if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                builder.credentials(Credentials::new(username.to_string(), password.to_string()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }

    /// Check if SMTP transport is enabled
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl MailSender for EmailService {
    async fn send_html_email(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let Some(transport) = &self.transport else {
            info!(
                subject,
                recipient, "Email service running in no-op mode; skipping actual send"
            );
            return Ok(());
        };

        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| IdentityError::InvalidEmail(e.to_string()))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| IdentityError::Email(format!("Failed to build email message: {}", e)))?;

        transport
            .send(email)
            .await
            .map_err(|e| IdentityError::Email(format!("Failed to send email: {}", e)))?;
        info!(subject, "HTML email sent successfully");
        Ok(())
    }
}

/// Payload of a `UserCreatedEmail` outbox message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeMailPayload {
    pub id: Uuid,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

pub fn render_welcome_mail(payload: &WelcomeMailPayload) -> RenderedMail {
    RenderedMail {
        subject: "Welcome to IAMService".to_string(),
        html_body: format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 20px; color: #333;">
    <h2>Welcome!</h2>
    <p>Your account has been created.</p>
    <p style="color: #666; font-size: 14px;">Account ID: {id}</p>
    <p style="color: #999; font-size: 12px; margin-top: 30px;">
        If you did not sign up, please contact support.
    </p>
</body>
</html>"#,
            id = payload.id
        ),
        text_body: format!(
            "Welcome!\n\nYour account has been created.\nAccount ID: {}\n\n\
            If you did not sign up, please contact support.",
            payload.id
        ),
    }
}

/// Sends the welcome email for `UserCreatedEmail` messages.
pub struct WelcomeMailHandler {
    mailer: Arc<dyn MailSender>,
}

impl WelcomeMailHandler {
    pub fn new(mailer: Arc<dyn MailSender>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl MessageHandler for WelcomeMailHandler {
    async fn handle(&self, message: &OutboxMessage) -> anyhow::Result<()> {
        let payload: WelcomeMailPayload = message.payload_json()?;
        let mail = render_welcome_mail(&payload);

        self.mailer
            .send_html_email(&payload.to, &mail.subject, &mail.html_body, &mail.text_body)
            .await?;

        info!(event_id = %message.id, user_id = %payload.id, "Welcome email sent");
        Ok(())
    }
}
