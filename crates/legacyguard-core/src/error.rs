//! Error taxonomy for the delivery service.
//!
//! Closed enums instead of stringly-typed error shapes: callers match on
//! kinds, not on message substrings.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LegacyGuardError>;

/// Top-level service error.
#[derive(Debug, Error)]
pub enum LegacyGuardError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Data-integrity failure on a capsule row. The capsule is excluded
    /// from the current pass, never silently "fixed".
    #[error("Malformed capsule {id}: {reason}")]
    MalformedCapsule { id: String, reason: String },

    #[error("Recipient {recipient_id} could not be resolved")]
    RecipientResolution { recipient_id: String },

    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Auth failed: {0}")]
    AuthFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a single outbound email attempt, as reported by a mail
/// transport. The dispatcher decides retry policy from the kind alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("provider rate limited the send")]
    RateLimited,

    #[error("recipient address rejected: {0}")]
    InvalidAddress(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl SendError {
    /// Permanent failures are never retried on later passes.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SendError::InvalidAddress(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanence() {
        assert!(SendError::InvalidAddress("x@y".into()).is_permanent());
        assert!(!SendError::RateLimited.is_permanent());
        assert!(!SendError::ProviderUnavailable("503".into()).is_permanent());
    }
}
