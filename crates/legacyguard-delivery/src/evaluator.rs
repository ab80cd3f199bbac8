//! Unlock-condition evaluation. Pure — operates on already-fetched data.

use chrono::{DateTime, Utc};

use legacyguard_core::error::{LegacyGuardError, Result};
use legacyguard_core::types::{ProfileStatus, TimeCapsuleMessage, UnlockCondition};

/// Decide whether a capsule is due to unlock at `now`.
///
/// `Date` capsules unlock once `unlock_date <= now` — the boundary is
/// inclusive, a capsule due exactly now unlocks. `AfterPassing` capsules
/// unlock only when the sender's status is exactly `deceased`; any other
/// status value means "not yet" and never raises.
///
/// A `Date` capsule without an `unlock_date` is a data-integrity error:
/// the caller gets `MalformedCapsule`, never a guess.
pub fn should_unlock(
    capsule: &TimeCapsuleMessage,
    sender_status: ProfileStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    match capsule.unlock_condition {
        UnlockCondition::Date => {
            let due = capsule
                .unlock_date
                .ok_or_else(|| LegacyGuardError::MalformedCapsule {
                    id: capsule.id.clone(),
                    reason: "date-conditioned capsule has no unlock date".into(),
                })?;
            Ok(due <= now)
        }
        UnlockCondition::AfterPassing => Ok(sender_status == ProfileStatus::Deceased),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use legacyguard_core::types::{CapsuleStatus, MessageType};

    fn capsule(condition: UnlockCondition, unlock_date: Option<DateTime<Utc>>) -> TimeCapsuleMessage {
        let now = Utc::now();
        TimeCapsuleMessage {
            id: "cap-1".into(),
            user_id: "u-1".into(),
            title: "Letters".into(),
            message_type: MessageType::Text,
            text_content: None,
            attachment_url: None,
            recipient_ids: vec!["tp-1".into()],
            unlock_condition: condition,
            unlock_date,
            status: CapsuleStatus::Locked,
            created_at: now,
            updated_at: now,
            unlocked_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn test_past_date_unlocks() {
        let now = Utc::now();
        let c = capsule(UnlockCondition::Date, Some(now - Duration::days(1)));
        assert!(should_unlock(&c, ProfileStatus::Active, now).unwrap());
    }

    #[test]
    fn test_future_date_stays_locked() {
        let now = Utc::now();
        let c = capsule(UnlockCondition::Date, Some(now + Duration::days(1)));
        assert!(!should_unlock(&c, ProfileStatus::Active, now).unwrap());
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let now = Utc::now();
        let c = capsule(UnlockCondition::Date, Some(now));
        assert!(should_unlock(&c, ProfileStatus::Active, now).unwrap());
    }

    #[test]
    fn test_after_passing_requires_deceased() {
        let now = Utc::now();
        let c = capsule(UnlockCondition::AfterPassing, None);
        assert!(should_unlock(&c, ProfileStatus::Deceased, now).unwrap());
        assert!(!should_unlock(&c, ProfileStatus::Active, now).unwrap());
        // Unknown statuses are "not yet", never an error.
        assert!(!should_unlock(&c, ProfileStatus::Other, now).unwrap());
    }

    #[test]
    fn test_missing_date_is_malformed() {
        let now = Utc::now();
        let c = capsule(UnlockCondition::Date, None);
        let err = should_unlock(&c, ProfileStatus::Active, now).unwrap_err();
        assert!(matches!(
            err,
            LegacyGuardError::MalformedCapsule { ref id, .. } if id == "cap-1"
        ));
    }
}
