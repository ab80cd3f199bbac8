//! The delivery dispatcher — one batch pass over due capsules.
//!
//! Per-capsule and per-recipient failures are isolated: they are recorded
//! in the report and the audit log, and the capsule simply stays in its
//! current state for the next pass. Only a storage failure on the scan
//! queries aborts the whole pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use legacyguard_core::config::DeliveryConfig;
use legacyguard_core::error::{LegacyGuardError, Result, SendError};
use legacyguard_core::traits::Mailer;
use legacyguard_core::types::{
    CapsuleStatus, ProfileStatus, TimeCapsuleMessage, TrustedPerson, UnlockCondition,
};
use legacyguard_store::{CapsuleDelivery, DeliveryState, Store};

use crate::evaluator;
use crate::notice;

/// Outcome summary of one dispatch pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    /// Locked capsules examined.
    pub scanned: usize,
    /// Unlocked capsules carried over from earlier partial failures.
    pub resumed: usize,
    pub unlocked: usize,
    pub delivered: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    /// Capsules excluded from this pass for data-integrity reasons.
    pub malformed: Vec<String>,
    pub failures: Vec<DeliveryFailure>,
}

/// One recorded failure within a pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub capsule_id: String,
    pub recipient_id: Option<String>,
    pub error: String,
}

/// Walks locked capsules through evaluation, unlock, notification, and
/// delivery. All collaborators are injected; the dispatcher holds no
/// ambient state.
pub struct Dispatcher {
    store: Arc<Store>,
    mailer: Arc<dyn Mailer>,
    app_url: String,
    max_attempts: u32,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        mailer: Arc<dyn Mailer>,
        config: &DeliveryConfig,
        app_url: &str,
    ) -> Self {
        Self {
            store,
            mailer,
            app_url: app_url.to_string(),
            max_attempts: config.max_attempts.max(1),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
        }
    }

    /// Run one dispatch pass.
    pub async fn run_pass(&self) -> Result<DeliveryReport> {
        let now = Utc::now();
        let mut report = DeliveryReport::default();

        // Both scans up front, before any state changes: a capsule
        // unlocked during this pass must not show up in the carry-over
        // list and get a second round of sends.
        let carried = self
            .store
            .list_capsules_with_status(CapsuleStatus::Unlocked)?;
        let locked = self.store.list_capsules_with_status(CapsuleStatus::Locked)?;
        report.resumed = carried.len();
        report.scanned = locked.len();

        for capsule in carried {
            self.deliver(&capsule, &mut report).await;
        }

        for capsule in locked {
            match self.evaluate(&capsule, now) {
                Ok(false) => {}
                Ok(true) => {
                    if self.store.claim_unlock(&capsule.id, now)? {
                        tracing::info!("🔓 Capsule '{}' ({}) unlocked", capsule.title, capsule.id);
                        report.unlocked += 1;
                        self.deliver(&capsule, &mut report).await;
                    }
                }
                Err(LegacyGuardError::MalformedCapsule { id, reason }) => {
                    tracing::error!("Malformed capsule {id} excluded from pass: {reason}");
                    report.failures.push(DeliveryFailure {
                        capsule_id: id.clone(),
                        recipient_id: None,
                        error: reason,
                    });
                    report.malformed.push(id);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Dispatch pass done: {} scanned, {} unlocked, {} delivered, {} sent, {} failed",
            report.scanned,
            report.unlocked,
            report.delivered,
            report.notifications_sent,
            report.notifications_failed,
        );
        Ok(report)
    }

    /// Evaluate one capsule, fetching the sender's status only when the
    /// condition needs it.
    fn evaluate(&self, capsule: &TimeCapsuleMessage, now: DateTime<Utc>) -> Result<bool> {
        let sender_status = match capsule.unlock_condition {
            UnlockCondition::Date => ProfileStatus::Active,
            UnlockCondition::AfterPassing => match self.store.get_profile(&capsule.user_id)? {
                Some(profile) => profile.status,
                None => {
                    tracing::warn!(
                        "Capsule {}: sender {} has no profile, treating as not yet due",
                        capsule.id,
                        capsule.user_id
                    );
                    return Ok(false);
                }
            },
        };
        evaluator::should_unlock(capsule, sender_status, now)
    }

    /// Send notices to every unsettled recipient of an unlocked capsule,
    /// then transition to `delivered` once all of them are settled.
    async fn deliver(&self, capsule: &TimeCapsuleMessage, report: &mut DeliveryReport) {
        let sender_name = match self.store.get_profile(&capsule.user_id) {
            Ok(Some(p)) if !p.full_name.is_empty() => p.full_name,
            Ok(_) => "A loved one".to_string(),
            Err(e) => {
                tracing::error!("Capsule {}: sender lookup failed: {e}", capsule.id);
                report.failures.push(DeliveryFailure {
                    capsule_id: capsule.id.clone(),
                    recipient_id: None,
                    error: e.to_string(),
                });
                return;
            }
        };

        let prior: HashMap<String, CapsuleDelivery> =
            match self.store.deliveries_for_capsule(&capsule.id) {
                Ok(records) => records
                    .into_iter()
                    .map(|d| (d.recipient_id.clone(), d))
                    .collect(),
                Err(e) => {
                    tracing::error!("Capsule {}: delivery records unavailable: {e}", capsule.id);
                    report.failures.push(DeliveryFailure {
                        capsule_id: capsule.id.clone(),
                        recipient_id: None,
                        error: e.to_string(),
                    });
                    return;
                }
            };

        // One batched lookup for all recipients of this capsule.
        let people: HashMap<String, TrustedPerson> =
            match self.store.get_trusted_people(&capsule.recipient_ids) {
                Ok(found) => found.into_iter().map(|p| (p.id.clone(), p)).collect(),
                Err(e) => {
                    tracing::error!("Capsule {}: recipient lookup failed: {e}", capsule.id);
                    report.failures.push(DeliveryFailure {
                        capsule_id: capsule.id.clone(),
                        recipient_id: None,
                        error: e.to_string(),
                    });
                    return;
                }
            };

        let mut all_settled = true;

        for recipient_id in &capsule.recipient_ids {
            let prior_attempts = prior.get(recipient_id).map(|d| d.attempts).unwrap_or(0);
            let prior_state = prior
                .get(recipient_id)
                .map(|d| d.status)
                .unwrap_or(DeliveryState::Pending);
            if prior_state != DeliveryState::Pending {
                // Already settled on an earlier pass — never re-send.
                continue;
            }

            let Some(person) = people.get(recipient_id) else {
                // A recipient the sender has since removed. Skipped, and
                // settled so it cannot hold the capsule open forever.
                let err = LegacyGuardError::RecipientResolution {
                    recipient_id: recipient_id.clone(),
                };
                tracing::warn!("Capsule {}: {err}", capsule.id);
                report.failures.push(DeliveryFailure {
                    capsule_id: capsule.id.clone(),
                    recipient_id: Some(recipient_id.clone()),
                    error: err.to_string(),
                });
                if self
                    .store
                    .record_delivery_failure(
                        &capsule.id,
                        recipient_id,
                        prior_attempts,
                        &err.to_string(),
                        true,
                    )
                    .is_err()
                {
                    all_settled = false;
                }
                self.store
                    .log_notification(
                        &capsule.id,
                        recipient_id,
                        "",
                        "failed",
                        Some(&err.to_string()),
                        None,
                    )
                    .ok();
                continue;
            };

            let email = notice::unlock_notice(person, &sender_name, &capsule.title, &self.app_url);
            let attempts = prior_attempts + 1;

            match tokio::time::timeout(self.send_timeout, self.mailer.send(&email)).await {
                Ok(Ok(message_id)) => {
                    report.notifications_sent += 1;
                    if self
                        .store
                        .record_delivery_sent(&capsule.id, recipient_id, attempts, &message_id)
                        .is_err()
                    {
                        // Without the settled record a later pass would
                        // re-send; keep the capsule out of `delivered`.
                        all_settled = false;
                    }
                    self.store
                        .log_notification(
                            &capsule.id,
                            recipient_id,
                            &person.email,
                            "sent",
                            None,
                            Some(&message_id),
                        )
                        .ok();
                }
                Ok(Err(send_err)) => {
                    self.note_failure(
                        capsule,
                        recipient_id,
                        &person.email,
                        attempts,
                        send_err,
                        report,
                        &mut all_settled,
                    );
                }
                Err(_) => {
                    self.note_failure(
                        capsule,
                        recipient_id,
                        &person.email,
                        attempts,
                        SendError::ProviderUnavailable("send timed out".into()),
                        report,
                        &mut all_settled,
                    );
                }
            }
        }

        if all_settled {
            match self.store.mark_delivered(&capsule.id, Utc::now()) {
                Ok(true) => {
                    tracing::info!("📬 Capsule '{}' ({}) delivered", capsule.title, capsule.id);
                    report.delivered += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Capsule {}: delivered transition failed: {e}", capsule.id);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn note_failure(
        &self,
        capsule: &TimeCapsuleMessage,
        recipient_id: &str,
        recipient_email: &str,
        attempts: u32,
        err: SendError,
        report: &mut DeliveryReport,
        all_settled: &mut bool,
    ) {
        let settled = err.is_permanent() || attempts >= self.max_attempts;
        if !settled {
            *all_settled = false;
        }
        tracing::warn!(
            "Capsule {}: send to {recipient_email} failed (attempt {attempts}): {err}",
            capsule.id
        );
        report.notifications_failed += 1;
        report.failures.push(DeliveryFailure {
            capsule_id: capsule.id.clone(),
            recipient_id: Some(recipient_id.to_string()),
            error: err.to_string(),
        });
        if self
            .store
            .record_delivery_failure(
                &capsule.id,
                recipient_id,
                attempts,
                &err.to_string(),
                settled,
            )
            .is_err()
        {
            *all_settled = false;
        }
        self.store
            .log_notification(
                &capsule.id,
                recipient_id,
                recipient_email,
                "failed",
                Some(&err.to_string()),
                None,
            )
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use legacyguard_core::traits::MessageId;
    use legacyguard_core::types::{MessageType, OutgoingEmail, Profile};
    use std::sync::Mutex;

    /// Records sends and fails addresses on demand.
    struct MockMailer {
        sent: Mutex<Vec<String>>,
        failing: Mutex<HashMap<String, SendError>>,
    }

    impl MockMailer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                failing: Mutex::new(HashMap::new()),
            })
        }

        fn fail_address(&self, email: &str, err: SendError) {
            self.failing.lock().unwrap().insert(email.into(), err);
        }

        fn clear_failures(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn sent_to(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        fn name(&self) -> &str {
            "mock"
        }

        async fn send(&self, email: &OutgoingEmail) -> std::result::Result<MessageId, SendError> {
            if let Some(err) = self.failing.lock().unwrap().get(&email.to_email) {
                return Err(err.clone());
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(email.to_email.clone());
            Ok(format!("msg-{}", sent.len()))
        }
    }

    struct Fixture {
        store: Arc<Store>,
        mailer: Arc<MockMailer>,
        dispatcher: Dispatcher,
        dir: std::path::PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn fixture(name: &str) -> Fixture {
        let dir = std::env::temp_dir().join(format!("legacyguard-dispatch-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        let store = Arc::new(Store::open(&path).unwrap());
        let mailer = MockMailer::new();
        let dispatcher = Dispatcher::new(
            store.clone(),
            mailer.clone(),
            &DeliveryConfig {
                max_attempts: 3,
                send_timeout_secs: 5,
                ..Default::default()
            },
            "https://app.example",
        );
        Fixture {
            store,
            mailer,
            dispatcher,
            dir,
        }
    }

    fn seed_sender(store: &Store, status: ProfileStatus) {
        let now = Utc::now();
        store
            .upsert_profile(&Profile {
                id: "u-1".into(),
                email: "sender@example.com".into(),
                full_name: "Jan Novak".into(),
                status,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    fn seed_recipients(store: &Store, ids: &[&str]) {
        let now = Utc::now();
        for id in ids {
            store
                .insert_trusted_person(&TrustedPerson {
                    id: id.to_string(),
                    user_id: "u-1".into(),
                    name: id.to_uppercase(),
                    email: format!("{id}@example.com"),
                    relationship: "family".into(),
                    is_emergency_contact: false,
                    created_at: now,
                })
                .unwrap();
        }
    }

    fn seed_capsule(
        store: &Store,
        id: &str,
        condition: UnlockCondition,
        unlock_date: Option<DateTime<Utc>>,
        recipients: &[&str],
    ) {
        let now = Utc::now();
        store
            .insert_capsule(&TimeCapsuleMessage {
                id: id.into(),
                user_id: "u-1".into(),
                title: "Our summer".into(),
                message_type: MessageType::Text,
                text_content: Some("hello".into()),
                attachment_url: None,
                recipient_ids: recipients.iter().map(|s| s.to_string()).collect(),
                unlock_condition: condition,
                unlock_date,
                status: CapsuleStatus::Locked,
                created_at: now,
                updated_at: now,
                unlocked_at: None,
                delivered_at: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_due_capsule_unlocks_and_delivers() {
        let f = fixture("due");
        seed_sender(&f.store, ProfileStatus::Active);
        seed_recipients(&f.store, &["tp-1", "tp-2"]);
        seed_capsule(
            &f.store,
            "cap-1",
            UnlockCondition::Date,
            Some(Utc::now() - ChronoDuration::days(1)),
            &["tp-1", "tp-2"],
        );

        let report = f.dispatcher.run_pass().await.unwrap();
        assert_eq!(report.unlocked, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.notifications_sent, 2);

        let capsule = f.store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Delivered);
        assert!(capsule.unlocked_at.is_some());
        assert!(capsule.delivered_at.is_some());

        let log = f.store.recent_notifications(10).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|e| e.outcome == "sent"));
    }

    #[tokio::test]
    async fn test_after_passing_waits_for_deceased() {
        let f = fixture("waiting");
        seed_sender(&f.store, ProfileStatus::Active);
        seed_recipients(&f.store, &["tp-1"]);
        seed_capsule(&f.store, "cap-1", UnlockCondition::AfterPassing, None, &["tp-1"]);

        let report = f.dispatcher.run_pass().await.unwrap();
        assert_eq!(report.unlocked, 0);
        assert!(f.mailer.sent_to().is_empty());
        let capsule = f.store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Locked);
    }

    #[tokio::test]
    async fn test_after_passing_delivers_once_deceased() {
        let f = fixture("deceased");
        seed_sender(&f.store, ProfileStatus::Deceased);
        seed_recipients(&f.store, &["tp-1", "tp-2", "tp-3"]);
        seed_capsule(
            &f.store,
            "cap-1",
            UnlockCondition::AfterPassing,
            None,
            &["tp-1", "tp-2", "tp-3"],
        );

        let report = f.dispatcher.run_pass().await.unwrap();
        assert_eq!(report.unlocked, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(f.mailer.sent_to().len(), 3);
        let capsule = f.store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Delivered);
    }

    #[tokio::test]
    async fn test_malformed_capsule_excluded_without_state_change() {
        let f = fixture("malformed");
        seed_sender(&f.store, ProfileStatus::Active);
        seed_recipients(&f.store, &["tp-1"]);
        seed_capsule(&f.store, "cap-bad", UnlockCondition::Date, None, &["tp-1"]);

        let report = f.dispatcher.run_pass().await.unwrap();
        assert_eq!(report.malformed, vec!["cap-bad".to_string()]);
        assert_eq!(report.unlocked, 0);
        assert!(f.mailer.sent_to().is_empty());
        let capsule = f.store.get_capsule("cap-bad").unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Locked);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let f = fixture("idempotent");
        seed_sender(&f.store, ProfileStatus::Active);
        seed_recipients(&f.store, &["tp-1"]);
        seed_capsule(
            &f.store,
            "cap-1",
            UnlockCondition::Date,
            Some(Utc::now() - ChronoDuration::hours(1)),
            &["tp-1"],
        );

        f.dispatcher.run_pass().await.unwrap();
        let report = f.dispatcher.run_pass().await.unwrap();
        assert_eq!(report.unlocked, 0);
        assert_eq!(report.notifications_sent, 0);
        // Exactly one email ever reached the recipient.
        assert_eq!(f.mailer.sent_to().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_retries_only_outstanding() {
        let f = fixture("partial");
        seed_sender(&f.store, ProfileStatus::Active);
        seed_recipients(&f.store, &["tp-1", "tp-2", "tp-3"]);
        seed_capsule(
            &f.store,
            "cap-1",
            UnlockCondition::Date,
            Some(Utc::now() - ChronoDuration::hours(1)),
            &["tp-1", "tp-2", "tp-3"],
        );
        f.mailer.fail_address(
            "tp-2@example.com",
            SendError::ProviderUnavailable("503".into()),
        );

        let report = f.dispatcher.run_pass().await.unwrap();
        assert_eq!(report.notifications_sent, 2);
        assert_eq!(report.notifications_failed, 1);
        assert_eq!(report.delivered, 0);
        let capsule = f.store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Unlocked);

        // Provider recovers; the next pass touches only the failed one.
        f.mailer.clear_failures();
        let report = f.dispatcher.run_pass().await.unwrap();
        assert_eq!(report.resumed, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(report.delivered, 1);

        let sent = f.mailer.sent_to();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent.iter().filter(|e| *e == "tp-1@example.com").count(),
            1,
            "already-notified recipients must not be re-sent"
        );
        let capsule = f.store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Delivered);
    }

    #[tokio::test]
    async fn test_permanent_failure_settles_recipient() {
        let f = fixture("permanent");
        seed_sender(&f.store, ProfileStatus::Active);
        seed_recipients(&f.store, &["tp-1", "tp-2"]);
        seed_capsule(
            &f.store,
            "cap-1",
            UnlockCondition::Date,
            Some(Utc::now() - ChronoDuration::hours(1)),
            &["tp-1", "tp-2"],
        );
        f.mailer.fail_address(
            "tp-2@example.com",
            SendError::InvalidAddress("tp-2@example.com".into()),
        );

        let report = f.dispatcher.run_pass().await.unwrap();
        // A dead address must not hold the capsule in unlocked forever.
        assert_eq!(report.delivered, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(report.notifications_failed, 1);

        let records = f.store.deliveries_for_capsule("cap-1").unwrap();
        let failed = records
            .iter()
            .find(|d| d.recipient_id == "tp-2")
            .unwrap();
        assert_eq!(failed.status, DeliveryState::Failed);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_after_cap() {
        let f = fixture("exhaust");
        seed_sender(&f.store, ProfileStatus::Active);
        seed_recipients(&f.store, &["tp-1"]);
        seed_capsule(
            &f.store,
            "cap-1",
            UnlockCondition::Date,
            Some(Utc::now() - ChronoDuration::hours(1)),
            &["tp-1"],
        );
        f.mailer
            .fail_address("tp-1@example.com", SendError::RateLimited);

        // max_attempts is 3: two passes leave it pending, the third settles.
        f.dispatcher.run_pass().await.unwrap();
        f.dispatcher.run_pass().await.unwrap();
        let capsule = f.store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Unlocked);

        f.dispatcher.run_pass().await.unwrap();
        let capsule = f.store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Delivered);
        let records = f.store.deliveries_for_capsule("cap-1").unwrap();
        assert_eq!(records[0].status, DeliveryState::Failed);
        assert_eq!(records[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_missing_recipient_skipped_others_notified() {
        let f = fixture("missing-recipient");
        seed_sender(&f.store, ProfileStatus::Active);
        seed_recipients(&f.store, &["tp-1"]);
        seed_capsule(
            &f.store,
            "cap-1",
            UnlockCondition::Date,
            Some(Utc::now() - ChronoDuration::hours(1)),
            &["tp-1", "tp-ghost"],
        );

        let report = f.dispatcher.run_pass().await.unwrap();
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(f.mailer.sent_to(), vec!["tp-1@example.com".to_string()]);
        // The unresolvable recipient settles as failed, so the capsule
        // still terminates.
        assert_eq!(report.delivered, 1);
    }
}
