//! LegacyGuard configuration system.
//!
//! TOML file with serde-defaulted sections: a missing file or a partial
//! file always yields a runnable config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LegacyGuardError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyGuardConfig {
    /// Public base URL of the web app, used in notification links.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub mailer: MailerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

fn default_app_url() -> String {
    "https://app.legacyguard.example".into()
}

impl Default for LegacyGuardConfig {
    fn default() -> Self {
        Self {
            app_url: default_app_url(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
            mailer: MailerConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl LegacyGuardConfig {
    /// Load config from the default path (~/.legacyguard/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LegacyGuardError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LegacyGuardError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LegacyGuardError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".legacyguard")
            .join("config.toml")
    }

    /// Get the LegacyGuard home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".legacyguard")
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "~/.legacyguard/legacyguard.db".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for the will-validation webhook signature.
    /// Empty disables the webhook route.
    #[serde(default)]
    pub webhook_secret: String,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8090
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_secret: String::new(),
        }
    }
}

/// Outbound email configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailerConfig {
    /// Which transport to use: "http" or "smtp".
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub http: HttpMailerConfig,
    #[serde(default)]
    pub smtp: SmtpMailerConfig,
}

fn default_transport() -> String {
    "http".into()
}
fn default_from_email() -> String {
    "no-reply@legacyguard.example".into()
}
fn default_from_name() -> String {
    "LegacyGuard".into()
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            from_email: default_from_email(),
            from_name: default_from_name(),
            http: HttpMailerConfig::default(),
            smtp: SmtpMailerConfig::default(),
        }
    }
}

/// HTTP email-provider transport settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpMailerConfig {
    /// Provider send endpoint, e.g. "https://api.provider.example/emails".
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
}

/// SMTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpMailerConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for SmtpMailerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Dispatch-pass configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// 5-field cron expression for the scheduled pass (UTC).
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// How often the background loop wakes to check the schedule.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Transient send failures retry on later passes up to this many
    /// attempts per recipient; exhaustion settles the recipient as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on a single provider call.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_schedule() -> String {
    "0 9 * * *".into()
}
fn default_check_interval() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    5
}
fn default_send_timeout() -> u64 {
    10
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            schedule: default_schedule(),
            check_interval_secs: default_check_interval(),
            max_attempts: default_max_attempts(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_runnable() {
        let cfg = LegacyGuardConfig::default();
        assert_eq!(cfg.delivery.schedule, "0 9 * * *");
        assert_eq!(cfg.delivery.max_attempts, 5);
        assert_eq!(cfg.gateway.port, 8090);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: LegacyGuardConfig = toml::from_str(
            r#"
            app_url = "https://phoenix.example"

            [delivery]
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.app_url, "https://phoenix.example");
        assert_eq!(cfg.delivery.max_attempts, 2);
        assert_eq!(cfg.delivery.check_interval_secs, 60);
        assert_eq!(cfg.mailer.transport, "http");
    }
}
