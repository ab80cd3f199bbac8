//! Trait seams between the delivery core and its collaborators.

use async_trait::async_trait;

use crate::error::SendError;
use crate::types::OutgoingEmail;

/// Provider-assigned identifier for an accepted message.
pub type MessageId = String;

/// Outbound email transport.
///
/// Implementations perform exactly one attempt per call and report the
/// outcome as a closed [`SendError`] kind. Retry and timeout policy belong
/// to the caller — the dispatcher stays the authority on state transitions.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Transport name, for logs and the notification audit trail.
    fn name(&self) -> &str;

    /// Attempt delivery of one email.
    async fn send(&self, email: &OutgoingEmail) -> Result<MessageId, SendError>;
}
