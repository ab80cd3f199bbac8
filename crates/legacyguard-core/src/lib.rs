//! # LegacyGuard Core
//!
//! Shared foundation for the delivery service: configuration, the closed
//! error taxonomy, domain types, and the outbound-mail trait seam.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::LegacyGuardConfig;
pub use error::{LegacyGuardError, Result, SendError};
pub use traits::{Mailer, MessageId};
