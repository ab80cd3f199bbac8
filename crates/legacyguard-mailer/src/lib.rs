//! # LegacyGuard Mailer
//!
//! Outbound email transports behind the core [`Mailer`] trait. Two
//! implementations: SMTP (lettre, async) and a generic HTTP email
//! provider (POST `{from, to, subject, html, text}`, any 2xx = accepted).
//!
//! Transports perform one attempt per call and classify failures into the
//! closed `SendError` kinds; retry policy lives with the dispatcher.

pub mod http;
pub mod smtp;

use std::sync::Arc;

use legacyguard_core::config::MailerConfig;
use legacyguard_core::error::{LegacyGuardError, Result};
use legacyguard_core::traits::Mailer;

pub use http::HttpMailer;
pub use smtp::SmtpMailer;

/// Construct the configured transport.
pub fn build_mailer(config: &MailerConfig) -> Result<Arc<dyn Mailer>> {
    match config.transport.as_str() {
        "smtp" => Ok(Arc::new(SmtpMailer::new(
            &config.smtp,
            &config.from_email,
            &config.from_name,
        )?)),
        "http" => Ok(Arc::new(HttpMailer::new(
            &config.http,
            &config.from_email,
            &config.from_name,
        )?)),
        other => Err(LegacyGuardError::Config(format!(
            "unknown mailer transport '{other}' (expected 'smtp' or 'http')"
        ))),
    }
}
