//! SMTP transport — async lettre over STARTTLS.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use legacyguard_core::config::SmtpMailerConfig;
use legacyguard_core::error::{LegacyGuardError, Result, SendError};
use legacyguard_core::traits::{Mailer, MessageId};
use legacyguard_core::types::OutgoingEmail;

/// SMTP mail transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpMailerConfig, from_email: &str, from_name: &str) -> Result<Self> {
        if config.host.is_empty() {
            return Err(LegacyGuardError::Config("smtp.host is not set".into()));
        }
        let from: Mailbox = format!("{from_name} <{from_email}>")
            .parse()
            .map_err(|e| LegacyGuardError::Config(format!("invalid from address: {e}")))?;

        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| LegacyGuardError::Config(format!("SMTP relay: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> std::result::Result<MessageId, SendError> {
        let to: Mailbox = match format!("{} <{}>", email.to_name, email.to_email).parse() {
            Ok(mb) => mb,
            // Display names can carry characters the grammar rejects;
            // the bare address is the part that has to be valid.
            Err(_) => email
                .to_email
                .parse()
                .map_err(|_| SendError::InvalidAddress(email.to_email.clone()))?,
        };

        let message_id = format!("<{}@legacyguard>", uuid::Uuid::new_v4());
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| SendError::ProviderUnavailable(format!("build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| classify_smtp_error(&e, &email.to_email))?;

        tracing::info!("📤 Email sent to {} via SMTP", email.to_email);
        Ok(message_id)
    }
}

/// Map an SMTP failure into the closed send-error taxonomy.
///
/// 5xx replies never succeed on retry; 4xx replies are the server asking
/// us to slow down or come back later.
fn classify_smtp_error(err: &lettre::transport::smtp::Error, to: &str) -> SendError {
    if err.is_permanent() {
        SendError::InvalidAddress(to.to_string())
    } else if err.is_transient() {
        SendError::RateLimited
    } else {
        SendError::ProviderUnavailable(err.to_string())
    }
}
