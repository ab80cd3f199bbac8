//! Domain types shared across the service.
//!
//! JSON field naming follows the product API (camelCase); the storage layer
//! maps these to snake_case columns by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-capsule message: content a user leaves behind for trusted people,
/// released when its unlock condition is met.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeCapsuleMessage {
    pub id: String,
    /// Owner (sender) profile id.
    pub user_id: String,
    pub title: String,
    pub message_type: MessageType,
    pub text_content: Option<String>,
    /// Opaque reference to an uploaded attachment; never interpreted here.
    pub attachment_url: Option<String>,
    /// Ordered references into trusted people.
    pub recipient_ids: Vec<String>,
    pub unlock_condition: UnlockCondition,
    /// Required iff `unlock_condition` is `Date`.
    pub unlock_date: Option<DateTime<Utc>>,
    pub status: CapsuleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Capsule content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Photo,
    Video,
    Audio,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Photo => "photo",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageType::Text),
            "photo" => Some(MessageType::Photo),
            "video" => Some(MessageType::Video),
            "audio" => Some(MessageType::Audio),
            _ => None,
        }
    }
}

/// Rule deciding when a capsule becomes visible to its recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockCondition {
    /// Unlock once a fixed UTC date has been reached (inclusive).
    Date,
    /// Unlock once the sender's profile is marked deceased.
    AfterPassing,
}

impl UnlockCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockCondition::Date => "date",
            UnlockCondition::AfterPassing => "after_passing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "date" => Some(UnlockCondition::Date),
            "after_passing" => Some(UnlockCondition::AfterPassing),
            _ => None,
        }
    }
}

/// Capsule lifecycle. `Delivered` is terminal; rows are never transitioned
/// backwards and never deleted by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStatus {
    Locked,
    Unlocked,
    Delivered,
}

impl CapsuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleStatus::Locked => "locked",
            CapsuleStatus::Unlocked => "unlocked",
            CapsuleStatus::Delivered => "delivered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "locked" => Some(CapsuleStatus::Locked),
            "unlocked" => Some(CapsuleStatus::Unlocked),
            "delivered" => Some(CapsuleStatus::Delivered),
            _ => None,
        }
    }
}

/// A user profile. Only the fields the delivery workflow reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub status: ProfileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sender liveness status. Anything the store holds that is not a known
/// value parses to `Other` and is treated as "not deceased" — unknown
/// statuses must never unlock a capsule, and must never panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Active,
    Deceased,
    #[serde(other)]
    Other,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Active => "active",
            ProfileStatus::Deceased => "deceased",
            ProfileStatus::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => ProfileStatus::Active,
            "deceased" => ProfileStatus::Deceased,
            _ => ProfileStatus::Other,
        }
    }
}

/// A contact the sender designated as a recipient or role-holder.
/// Read-only from the delivery workflow's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedPerson {
    pub id: String,
    /// Profile id of the user who designated this person.
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub relationship: String,
    pub is_emergency_contact: bool,
    pub created_at: DateTime<Utc>,
}

/// A fully rendered outbound email, ready for any transport.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in ["locked", "unlocked", "delivered"] {
            assert_eq!(CapsuleStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(CapsuleStatus::parse("archived").is_none());
    }

    #[test]
    fn test_profile_status_never_fails() {
        assert_eq!(ProfileStatus::parse("deceased"), ProfileStatus::Deceased);
        assert_eq!(ProfileStatus::parse("active"), ProfileStatus::Active);
        assert_eq!(ProfileStatus::parse("hospitalized"), ProfileStatus::Other);
        assert_eq!(ProfileStatus::parse(""), ProfileStatus::Other);
    }

    #[test]
    fn test_unlock_condition_json_names() {
        let v = serde_json::to_string(&UnlockCondition::AfterPassing).unwrap();
        assert_eq!(v, "\"after_passing\"");
    }
}
