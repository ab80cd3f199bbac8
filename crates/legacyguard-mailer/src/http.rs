//! HTTP email-provider transport.
//!
//! POST `{from, to, subject, html, text}` to the provider endpoint with a
//! bearer key. Any 2xx is an accepted message; everything else maps into
//! the closed `SendError` taxonomy.

use async_trait::async_trait;

use legacyguard_core::config::HttpMailerConfig;
use legacyguard_core::error::{LegacyGuardError, Result, SendError};
use legacyguard_core::traits::{Mailer, MessageId};
use legacyguard_core::types::OutgoingEmail;

/// HTTP mail transport.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(config: &HttpMailerConfig, from_email: &str, from_name: &str) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(LegacyGuardError::Config("http mailer endpoint is not set".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| LegacyGuardError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            from: format!("{from_name} <{from_email}>"),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, email: &OutgoingEmail) -> std::result::Result<MessageId, SendError> {
        let payload = serde_json::json!({
            "from": self.from,
            "to": email.to_email,
            "subject": email.subject,
            "html": email.html,
            "text": email.text,
        });

        let mut req = self.client.post(&self.endpoint).json(&payload);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                SendError::ProviderUnavailable("request timed out".into())
            } else {
                SendError::ProviderUnavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let id = body["id"].as_str().unwrap_or("accepted").to_string();
            tracing::info!("📤 Email sent to {} via provider API", email.to_email);
            return Ok(id);
        }

        let detail = resp.text().await.unwrap_or_default();
        Err(classify_http_status(
            status.as_u16(),
            &email.to_email,
            &detail,
        ))
    }
}

/// Map a non-2xx provider response into the closed send-error taxonomy.
fn classify_http_status(status: u16, to: &str, detail: &str) -> SendError {
    match status {
        429 => SendError::RateLimited,
        // The provider rejected the message itself, not the connection —
        // resending the same payload cannot succeed.
        400 | 422 => SendError::InvalidAddress(to.to_string()),
        _ => SendError::ProviderUnavailable(format!(
            "HTTP {status}: {}",
            detail.chars().take(200).collect::<String>()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_http_status(429, "a@example.com", ""),
            SendError::RateLimited
        );
        assert_eq!(
            classify_http_status(422, "a@example.com", "bad address"),
            SendError::InvalidAddress("a@example.com".into())
        );
        assert!(matches!(
            classify_http_status(503, "a@example.com", "down"),
            SendError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            classify_http_status(401, "a@example.com", "bad key"),
            SendError::ProviderUnavailable(_)
        ));
    }
}
