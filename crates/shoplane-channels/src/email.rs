//! SMTP mailer — async lettre over STARTTLS.
//!
//! Implements the engine's `Mailer` seam. Supports Gmail, Outlook, custom
//! relays; credentials come from the `[smtp]` config section.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use shoplane_core::config::SmtpConfig;
use shoplane_core::error::{Result, ShoplaneError};
use shoplane_core::traits::Mailer;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from_name = config.display_name.as_deref().unwrap_or("Shoplane");
        let from: Mailbox = format!("{from_name} <{}>", config.email)
            .parse()
            .map_err(|e| ShoplaneError::Channel(format!("Invalid from: {e}")))?;

        let creds = Credentials::new(config.email.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| ShoplaneError::Channel(format!("SMTP relay: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| ShoplaneError::Channel(format!("Invalid to: {e}")))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| ShoplaneError::Channel(format!("Build email: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| ShoplaneError::Channel(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {to}");
        Ok(())
    }
}
