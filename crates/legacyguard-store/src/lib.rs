//! SQLite-backed persistence for the LegacyGuard delivery service.
//!
//! One database file holds the whole workflow state: capsules, profiles,
//! trusted people, per-recipient delivery records, the append-only
//! notification log, API tokens, and wills.
//!
//! The capsule status column is the state machine's single source of
//! truth. Every transition is a conditional update
//! (`UPDATE ... WHERE id = ? AND status = ?`) so concurrent dispatcher
//! instances cannot double-process a row — the losing writer simply
//! affects zero rows.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use legacyguard_core::error::{LegacyGuardError, Result};
use legacyguard_core::types::{
    CapsuleStatus, MessageType, Profile, ProfileStatus, TimeCapsuleMessage, TrustedPerson,
    UnlockCondition,
};

/// Per-recipient delivery state for an unlocked capsule.
///
/// `Sent` and `Failed` are settled — later passes never touch them again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => DeliveryState::Sent,
            "failed" => DeliveryState::Failed,
            _ => DeliveryState::Pending,
        }
    }
}

/// One recipient's delivery record for one capsule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleDelivery {
    pub capsule_id: String,
    pub recipient_id: String,
    pub status: DeliveryState,
    pub attempts: u32,
    pub message_id: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit entry for one notification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLogEntry {
    pub id: i64,
    pub capsule_id: String,
    pub recipient_id: String,
    pub recipient_email: String,
    /// "sent" or "failed".
    pub outcome: String,
    pub detail: Option<String>,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A structured will document awaiting or holding validation results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedWill {
    pub id: String,
    pub user_id: String,
    pub country_code: String,
    pub content: serde_json::Value,
    /// "draft" or "needs_revision".
    pub status: String,
    /// "pending", "passed", or "failed".
    pub validation_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored outcome of one validation run against a will.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WillValidationRecord {
    pub will_id: String,
    pub validation_type: String,
    pub is_valid: bool,
    pub issues: serde_json::Value,
    pub recommendations: serde_json::Value,
    pub validated_at: DateTime<Utc>,
}

/// Partial update applied to a capsule that is still locked.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleUpdate {
    pub title: Option<String>,
    pub text_content: Option<String>,
    pub attachment_url: Option<String>,
    pub recipient_ids: Option<Vec<String>>,
    pub unlock_condition: Option<UnlockCondition>,
    pub unlock_date: Option<DateTime<Utc>>,
}

/// Shared SELECT column list for capsule queries — single source of truth.
const CAPSULE_SELECT: &str = "SELECT id, user_id, title, message_type, text_content, \
     attachment_url, recipient_ids, unlock_condition, unlock_date, status, created_at, \
     updated_at, unlocked_at, delivered_at FROM time_capsule_messages";

/// The service database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| LegacyGuardError::Storage(format!("open {}: {e}", path.display())))?;

        // WAL improves concurrent read behavior; failure is non-fatal.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LegacyGuardError::Storage(format!("lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                full_name TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trusted_people (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                relationship TEXT NOT NULL DEFAULT '',
                is_emergency_contact INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS time_capsule_messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                message_type TEXT NOT NULL DEFAULT 'text',
                text_content TEXT,
                attachment_url TEXT,
                recipient_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array of trusted_people ids
                unlock_condition TEXT NOT NULL,            -- 'date' or 'after_passing'
                unlock_date TEXT,
                status TEXT NOT NULL DEFAULT 'locked',     -- locked, unlocked, delivered
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                unlocked_at TEXT,
                delivered_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_capsules_status
                ON time_capsule_messages(status);

            CREATE TABLE IF NOT EXISTS capsule_deliveries (
                capsule_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',    -- pending, sent, failed
                attempts INTEGER NOT NULL DEFAULT 0,
                message_id TEXT,
                last_error TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (capsule_id, recipient_id)
            );

            -- Audit trail, never replayed
            CREATE TABLE IF NOT EXISTS notification_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                capsule_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                recipient_email TEXT NOT NULL,
                outcome TEXT NOT NULL,                     -- sent, failed
                detail TEXT,
                message_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS api_tokens (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS generated_wills (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                country_code TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'draft',
                validation_status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS will_validations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                will_id TEXT NOT NULL,
                validation_type TEXT NOT NULL,
                is_valid INTEGER NOT NULL,
                issues TEXT NOT NULL DEFAULT '[]',
                recommendations TEXT NOT NULL DEFAULT '[]',
                validated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| LegacyGuardError::Storage(format!("migration: {e}")))?;
        Ok(())
    }

    // ─── Profiles ──────────────────────────────────────

    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO profiles (id, email, full_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                profile.id,
                profile.email,
                profile.full_name,
                profile.status.as_str(),
                profile.created_at.to_rfc3339(),
                profile.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("upsert profile: {e}")))?;
        Ok(())
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, email, full_name, status, created_at, updated_at
                 FROM profiles WHERE id = ?1",
            )
            .map_err(|e| LegacyGuardError::Storage(format!("get profile: {e}")))?;
        let mut rows = stmt
            .query_map([id], map_profile_row)
            .map_err(|e| LegacyGuardError::Storage(format!("get profile: {e}")))?;
        match rows.next() {
            Some(row) => row
                .map(Some)
                .map_err(|e| LegacyGuardError::Storage(format!("get profile: {e}"))),
            None => Ok(None),
        }
    }

    pub fn get_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, email, full_name, status, created_at, updated_at
                 FROM profiles WHERE email = ?1",
            )
            .map_err(|e| LegacyGuardError::Storage(format!("get profile by email: {e}")))?;
        let mut rows = stmt
            .query_map([email], map_profile_row)
            .map_err(|e| LegacyGuardError::Storage(format!("get profile by email: {e}")))?;
        match rows.next() {
            Some(row) => row
                .map(Some)
                .map_err(|e| LegacyGuardError::Storage(format!("get profile by email: {e}"))),
            None => Ok(None),
        }
    }

    /// Set a profile's liveness status. Returns false when the profile
    /// does not exist.
    pub fn set_profile_status(&self, id: &str, status: ProfileStatus) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE profiles SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| LegacyGuardError::Storage(format!("set profile status: {e}")))?;
        Ok(changed == 1)
    }

    // ─── Trusted people ──────────────────────────────────────

    pub fn insert_trusted_person(&self, person: &TrustedPerson) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO trusted_people
                 (id, user_id, name, email, relationship, is_emergency_contact, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                person.id,
                person.user_id,
                person.name,
                person.email,
                person.relationship,
                person.is_emergency_contact as i32,
                person.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("insert trusted person: {e}")))?;
        Ok(())
    }

    pub fn list_trusted_people(&self, user_id: &str) -> Result<Vec<TrustedPerson>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, email, relationship, is_emergency_contact, created_at
                 FROM trusted_people WHERE user_id = ?1 ORDER BY created_at",
            )
            .map_err(|e| LegacyGuardError::Storage(format!("list trusted people: {e}")))?;
        let rows = stmt
            .query_map([user_id], map_trusted_person_row)
            .map_err(|e| LegacyGuardError::Storage(format!("list trusted people: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Resolve a batch of trusted-person ids in one `IN` query. Missing ids
    /// are simply absent from the result — the caller decides what a hole
    /// means.
    pub fn get_trusted_people(&self, ids: &[String]) -> Result<Vec<TrustedPerson>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = std::iter::repeat("?")
            .take(ids.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT id, user_id, name, email, relationship, is_emergency_contact, created_at
             FROM trusted_people WHERE id IN ({placeholders})"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LegacyGuardError::Storage(format!("resolve recipients: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), map_trusted_person_row)
            .map_err(|e| LegacyGuardError::Storage(format!("resolve recipients: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn emergency_contacts(&self, user_id: &str) -> Result<Vec<TrustedPerson>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, email, relationship, is_emergency_contact, created_at
                 FROM trusted_people
                 WHERE user_id = ?1 AND is_emergency_contact = 1 ORDER BY created_at",
            )
            .map_err(|e| LegacyGuardError::Storage(format!("emergency contacts: {e}")))?;
        let rows = stmt
            .query_map([user_id], map_trusted_person_row)
            .map_err(|e| LegacyGuardError::Storage(format!("emergency contacts: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Capsules ──────────────────────────────────────

    pub fn insert_capsule(&self, capsule: &TimeCapsuleMessage) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO time_capsule_messages
                 (id, user_id, title, message_type, text_content, attachment_url,
                  recipient_ids, unlock_condition, unlock_date, status,
                  created_at, updated_at, unlocked_at, delivered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                capsule.id,
                capsule.user_id,
                capsule.title,
                capsule.message_type.as_str(),
                capsule.text_content,
                capsule.attachment_url,
                serde_json::to_string(&capsule.recipient_ids).unwrap_or_else(|_| "[]".into()),
                capsule.unlock_condition.as_str(),
                capsule.unlock_date.map(|t| t.to_rfc3339()),
                capsule.status.as_str(),
                capsule.created_at.to_rfc3339(),
                capsule.updated_at.to_rfc3339(),
                capsule.unlocked_at.map(|t| t.to_rfc3339()),
                capsule.delivered_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("insert capsule: {e}")))?;
        Ok(())
    }

    pub fn get_capsule(&self, id: &str) -> Result<Option<TimeCapsuleMessage>> {
        let conn = self.lock()?;
        let sql = format!("{CAPSULE_SELECT} WHERE id = ?1");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LegacyGuardError::Storage(format!("get capsule: {e}")))?;
        let mut rows = stmt
            .query_map([id], map_capsule_row)
            .map_err(|e| LegacyGuardError::Storage(format!("get capsule: {e}")))?;
        match rows.next() {
            Some(row) => row
                .map(Some)
                .map_err(|e| LegacyGuardError::Storage(format!("get capsule: {e}"))),
            None => Ok(None),
        }
    }

    pub fn list_capsules_for_user(&self, user_id: &str) -> Result<Vec<TimeCapsuleMessage>> {
        let conn = self.lock()?;
        let sql = format!("{CAPSULE_SELECT} WHERE user_id = ?1 ORDER BY created_at DESC");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LegacyGuardError::Storage(format!("list capsules: {e}")))?;
        let rows = stmt
            .query_map([user_id], map_capsule_row)
            .map_err(|e| LegacyGuardError::Storage(format!("list capsules: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Batch fetch of every capsule in one status — the dispatcher's scan
    /// query, one round-trip per pass.
    pub fn list_capsules_with_status(
        &self,
        status: CapsuleStatus,
    ) -> Result<Vec<TimeCapsuleMessage>> {
        let conn = self.lock()?;
        let sql = format!("{CAPSULE_SELECT} WHERE status = ?1 ORDER BY created_at");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LegacyGuardError::Storage(format!("scan capsules: {e}")))?;
        let rows = stmt
            .query_map([status.as_str()], map_capsule_row)
            .map_err(|e| LegacyGuardError::Storage(format!("scan capsules: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Apply a sender edit. Only the owner may edit, and only while the
    /// capsule is still locked. Returns the updated row, or None when no
    /// matching locked row exists.
    pub fn update_locked_capsule(
        &self,
        id: &str,
        user_id: &str,
        update: &CapsuleUpdate,
    ) -> Result<Option<TimeCapsuleMessage>> {
        let current = match self.get_capsule(id)? {
            Some(c) if c.user_id == user_id && c.status == CapsuleStatus::Locked => c,
            _ => return Ok(None),
        };

        let title = update.title.clone().unwrap_or(current.title);
        let text_content = update.text_content.clone().or(current.text_content);
        let attachment_url = update.attachment_url.clone().or(current.attachment_url);
        let recipient_ids = update
            .recipient_ids
            .clone()
            .unwrap_or(current.recipient_ids);
        let unlock_condition = update.unlock_condition.unwrap_or(current.unlock_condition);
        // A condition switch to after_passing drops any stale date.
        let unlock_date = match unlock_condition {
            UnlockCondition::AfterPassing => None,
            UnlockCondition::Date => update.unlock_date.or(current.unlock_date),
        };

        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE time_capsule_messages
                 SET title = ?1, text_content = ?2, attachment_url = ?3, recipient_ids = ?4,
                     unlock_condition = ?5, unlock_date = ?6, updated_at = ?7
                 WHERE id = ?8 AND user_id = ?9 AND status = 'locked'",
                params![
                    title,
                    text_content,
                    attachment_url,
                    serde_json::to_string(&recipient_ids).unwrap_or_else(|_| "[]".into()),
                    unlock_condition.as_str(),
                    unlock_date.map(|t| t.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                    id,
                    user_id,
                ],
            )
            .map_err(|e| LegacyGuardError::Storage(format!("update capsule: {e}")))?;
        drop(conn);

        if changed == 1 {
            self.get_capsule(id)
        } else {
            Ok(None)
        }
    }

    /// Delete a capsule the sender still owns and has not had unlocked.
    pub fn delete_locked_capsule(&self, id: &str, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM time_capsule_messages
                 WHERE id = ?1 AND user_id = ?2 AND status = 'locked'",
                params![id, user_id],
            )
            .map_err(|e| LegacyGuardError::Storage(format!("delete capsule: {e}")))?;
        Ok(changed == 1)
    }

    /// Claim the `locked → unlocked` transition. Conditioned on the row
    /// still being locked; returns false when another dispatcher won the
    /// race (or the capsule moved on).
    pub fn claim_unlock(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE time_capsule_messages
                 SET status = 'unlocked', unlocked_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'locked'",
                params![at.to_rfc3339(), id],
            )
            .map_err(|e| LegacyGuardError::Storage(format!("claim unlock: {e}")))?;
        Ok(changed == 1)
    }

    /// The `unlocked → delivered` transition, taken only once every
    /// recipient is settled. `delivered` is terminal.
    pub fn mark_delivered(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE time_capsule_messages
                 SET status = 'delivered', delivered_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'unlocked'",
                params![at.to_rfc3339(), id],
            )
            .map_err(|e| LegacyGuardError::Storage(format!("mark delivered: {e}")))?;
        Ok(changed == 1)
    }

    // ─── Per-recipient deliveries ──────────────────────────────────────

    pub fn deliveries_for_capsule(&self, capsule_id: &str) -> Result<Vec<CapsuleDelivery>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT capsule_id, recipient_id, status, attempts, message_id, last_error, updated_at
                 FROM capsule_deliveries WHERE capsule_id = ?1",
            )
            .map_err(|e| LegacyGuardError::Storage(format!("load deliveries: {e}")))?;
        let rows = stmt
            .query_map([capsule_id], |row| {
                Ok(CapsuleDelivery {
                    capsule_id: row.get(0)?,
                    recipient_id: row.get(1)?,
                    status: DeliveryState::parse(&row.get::<_, String>(2)?),
                    attempts: row.get(3)?,
                    message_id: row.get(4)?,
                    last_error: row.get(5)?,
                    updated_at: parse_ts(&row.get::<_, String>(6)?),
                })
            })
            .map_err(|e| LegacyGuardError::Storage(format!("load deliveries: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Settle a recipient as sent, keeping the provider message id.
    pub fn record_delivery_sent(
        &self,
        capsule_id: &str,
        recipient_id: &str,
        attempts: u32,
        message_id: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO capsule_deliveries
                 (capsule_id, recipient_id, status, attempts, message_id, last_error, updated_at)
             VALUES (?1, ?2, 'sent', ?3, ?4, NULL, ?5)",
            params![
                capsule_id,
                recipient_id,
                attempts,
                message_id,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("record delivery sent: {e}")))?;
        Ok(())
    }

    /// Record a failed attempt. `settled` marks the recipient as
    /// permanently failed (bad address, exhausted retries); otherwise the
    /// record stays pending and a later pass retries it.
    pub fn record_delivery_failure(
        &self,
        capsule_id: &str,
        recipient_id: &str,
        attempts: u32,
        error: &str,
        settled: bool,
    ) -> Result<()> {
        let status = if settled { "failed" } else { "pending" };
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO capsule_deliveries
                 (capsule_id, recipient_id, status, attempts, message_id, last_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
            params![
                capsule_id,
                recipient_id,
                status,
                attempts,
                error,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("record delivery failure: {e}")))?;
        Ok(())
    }

    // ─── Notification log ──────────────────────────────────────

    /// Append one attempt to the audit trail.
    pub fn log_notification(
        &self,
        capsule_id: &str,
        recipient_id: &str,
        recipient_email: &str,
        outcome: &str,
        detail: Option<&str>,
        message_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notification_logs
                 (capsule_id, recipient_id, recipient_email, outcome, detail, message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                capsule_id,
                recipient_id,
                recipient_email,
                outcome,
                detail,
                message_id,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("log notification: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_notifications(&self, limit: usize) -> Result<Vec<NotificationLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, capsule_id, recipient_id, recipient_email, outcome, detail, message_id, created_at
                 FROM notification_logs ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| LegacyGuardError::Storage(format!("recent notifications: {e}")))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(NotificationLogEntry {
                    id: row.get(0)?,
                    capsule_id: row.get(1)?,
                    recipient_id: row.get(2)?,
                    recipient_email: row.get(3)?,
                    outcome: row.get(4)?,
                    detail: row.get(5)?,
                    message_id: row.get(6)?,
                    created_at: parse_ts(&row.get::<_, String>(7)?),
                })
            })
            .map_err(|e| LegacyGuardError::Storage(format!("recent notifications: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── API tokens ──────────────────────────────────────

    pub fn insert_api_token(&self, token: &str, user_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO api_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("insert token: {e}")))?;
        Ok(())
    }

    pub fn user_for_token(&self, token: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM api_tokens WHERE token = ?1")
            .map_err(|e| LegacyGuardError::Storage(format!("lookup token: {e}")))?;
        let mut rows = stmt
            .query_map([token], |row| row.get::<_, String>(0))
            .map_err(|e| LegacyGuardError::Storage(format!("lookup token: {e}")))?;
        match rows.next() {
            Some(row) => row
                .map(Some)
                .map_err(|e| LegacyGuardError::Storage(format!("lookup token: {e}"))),
            None => Ok(None),
        }
    }

    // ─── Wills ──────────────────────────────────────

    pub fn insert_will(&self, will: &GeneratedWill) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO generated_wills
                 (id, user_id, country_code, content, status, validation_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                will.id,
                will.user_id,
                will.country_code,
                will.content.to_string(),
                will.status,
                will.validation_status,
                will.created_at.to_rfc3339(),
                will.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("insert will: {e}")))?;
        Ok(())
    }

    pub fn get_will(&self, id: &str) -> Result<Option<GeneratedWill>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, country_code, content, status, validation_status, created_at, updated_at
                 FROM generated_wills WHERE id = ?1",
            )
            .map_err(|e| LegacyGuardError::Storage(format!("get will: {e}")))?;
        let mut rows = stmt
            .query_map([id], map_will_row)
            .map_err(|e| LegacyGuardError::Storage(format!("get will: {e}")))?;
        match rows.next() {
            Some(row) => row
                .map(Some)
                .map_err(|e| LegacyGuardError::Storage(format!("get will: {e}"))),
            None => Ok(None),
        }
    }

    pub fn list_wills_for_user(&self, user_id: &str) -> Result<Vec<GeneratedWill>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, country_code, content, status, validation_status, created_at, updated_at
                 FROM generated_wills WHERE user_id = ?1 ORDER BY created_at DESC",
            )
            .map_err(|e| LegacyGuardError::Storage(format!("list wills: {e}")))?;
        let rows = stmt
            .query_map([user_id], map_will_row)
            .map_err(|e| LegacyGuardError::Storage(format!("list wills: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn record_will_validation(&self, record: &WillValidationRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO will_validations
                 (will_id, validation_type, is_valid, issues, recommendations, validated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.will_id,
                record.validation_type,
                record.is_valid as i32,
                record.issues.to_string(),
                record.recommendations.to_string(),
                record.validated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| LegacyGuardError::Storage(format!("record will validation: {e}")))?;
        Ok(())
    }

    /// Flip a will to needs-revision after a failed validation.
    pub fn mark_will_needs_revision(&self, will_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE generated_wills
                 SET status = 'needs_revision', validation_status = 'failed', updated_at = ?1
                 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), will_id],
            )
            .map_err(|e| LegacyGuardError::Storage(format!("mark will needs revision: {e}")))?;
        Ok(changed == 1)
    }

    pub fn mark_will_validated(&self, will_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE generated_wills SET validation_status = 'passed', updated_at = ?1
                 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), will_id],
            )
            .map_err(|e| LegacyGuardError::Storage(format!("mark will validated: {e}")))?;
        Ok(changed == 1)
    }
}

// ─── Row mappers ──────────────────────────────────────

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn map_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        status: ProfileStatus::parse(&row.get::<_, String>(3)?),
        created_at: parse_ts(&row.get::<_, String>(4)?),
        updated_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

fn map_trusted_person_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrustedPerson> {
    Ok(TrustedPerson {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        relationship: row.get(4)?,
        is_emergency_contact: row.get::<_, i32>(5)? != 0,
        created_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn map_capsule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimeCapsuleMessage> {
    let recipient_ids: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(6)?).unwrap_or_default();
    Ok(TimeCapsuleMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        message_type: MessageType::parse(&row.get::<_, String>(3)?).unwrap_or(MessageType::Text),
        text_content: row.get(4)?,
        attachment_url: row.get(5)?,
        recipient_ids,
        unlock_condition: UnlockCondition::parse(&row.get::<_, String>(7)?)
            .unwrap_or(UnlockCondition::Date),
        unlock_date: parse_opt_ts(row.get(8)?),
        status: CapsuleStatus::parse(&row.get::<_, String>(9)?).unwrap_or(CapsuleStatus::Locked),
        created_at: parse_ts(&row.get::<_, String>(10)?),
        updated_at: parse_ts(&row.get::<_, String>(11)?),
        unlocked_at: parse_opt_ts(row.get(12)?),
        delivered_at: parse_opt_ts(row.get(13)?),
    })
}

fn map_will_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GeneratedWill> {
    let content: serde_json::Value =
        serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default();
    Ok(GeneratedWill {
        id: row.get(0)?,
        user_id: row.get(1)?,
        country_code: row.get(2)?,
        content,
        status: row.get(4)?,
        validation_status: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?),
        updated_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn temp_store(name: &str) -> (Store, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("legacyguard-store-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        (Store::open(&path).unwrap(), dir)
    }

    fn capsule(id: &str, user: &str) -> TimeCapsuleMessage {
        let now = Utc::now();
        TimeCapsuleMessage {
            id: id.into(),
            user_id: user.into(),
            title: "For my daughter".into(),
            message_type: MessageType::Text,
            text_content: Some("Hello from the past".into()),
            attachment_url: None,
            recipient_ids: vec!["tp-1".into(), "tp-2".into()],
            unlock_condition: UnlockCondition::Date,
            unlock_date: Some(now - Duration::days(1)),
            status: CapsuleStatus::Locked,
            created_at: now,
            updated_at: now,
            unlocked_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn test_capsule_roundtrip() {
        let (store, dir) = temp_store("roundtrip");
        store.insert_capsule(&capsule("cap-1", "u-1")).unwrap();

        let loaded = store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(loaded.title, "For my daughter");
        assert_eq!(loaded.recipient_ids, vec!["tp-1", "tp-2"]);
        assert_eq!(loaded.status, CapsuleStatus::Locked);
        assert!(loaded.unlock_date.is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_claim_unlock_is_exclusive() {
        let (store, dir) = temp_store("claim");
        store.insert_capsule(&capsule("cap-1", "u-1")).unwrap();

        let now = Utc::now();
        assert!(store.claim_unlock("cap-1", now).unwrap());
        // Second claim loses: the row is no longer locked.
        assert!(!store.claim_unlock("cap-1", now).unwrap());

        let loaded = store.get_capsule("cap-1").unwrap().unwrap();
        assert_eq!(loaded.status, CapsuleStatus::Unlocked);
        assert!(loaded.unlocked_at.is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_delivered_is_terminal() {
        let (store, dir) = temp_store("terminal");
        store.insert_capsule(&capsule("cap-1", "u-1")).unwrap();

        let now = Utc::now();
        // Cannot deliver straight from locked.
        assert!(!store.mark_delivered("cap-1", now).unwrap());
        assert!(store.claim_unlock("cap-1", now).unwrap());
        assert!(store.mark_delivered("cap-1", now).unwrap());
        // No transition leaves delivered.
        assert!(!store.claim_unlock("cap-1", now).unwrap());
        assert!(!store.mark_delivered("cap-1", now).unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_edits_refused_once_unlocked() {
        let (store, dir) = temp_store("edits");
        store.insert_capsule(&capsule("cap-1", "u-1")).unwrap();

        let update = CapsuleUpdate {
            title: Some("New title".into()),
            ..Default::default()
        };
        // Wrong owner: refused.
        assert!(
            store
                .update_locked_capsule("cap-1", "u-2", &update)
                .unwrap()
                .is_none()
        );
        // Owner while locked: accepted.
        let updated = store
            .update_locked_capsule("cap-1", "u-1", &update)
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "New title");

        store.claim_unlock("cap-1", Utc::now()).unwrap();
        assert!(
            store
                .update_locked_capsule("cap-1", "u-1", &update)
                .unwrap()
                .is_none()
        );
        assert!(!store.delete_locked_capsule("cap-1", "u-1").unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_condition_switch_clears_date() {
        let (store, dir) = temp_store("switch");
        store.insert_capsule(&capsule("cap-1", "u-1")).unwrap();

        let update = CapsuleUpdate {
            unlock_condition: Some(UnlockCondition::AfterPassing),
            ..Default::default()
        };
        let updated = store
            .update_locked_capsule("cap-1", "u-1", &update)
            .unwrap()
            .unwrap();
        assert_eq!(updated.unlock_condition, UnlockCondition::AfterPassing);
        assert!(updated.unlock_date.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_recipient_batch_lookup() {
        let (store, dir) = temp_store("recipients");
        let now = Utc::now();
        for (id, email) in [("tp-1", "a@example.com"), ("tp-2", "b@example.com")] {
            store
                .insert_trusted_person(&TrustedPerson {
                    id: id.into(),
                    user_id: "u-1".into(),
                    name: id.to_uppercase(),
                    email: email.into(),
                    relationship: "friend".into(),
                    is_emergency_contact: false,
                    created_at: now,
                })
                .unwrap();
        }

        let found = store
            .get_trusted_people(&["tp-1".into(), "tp-2".into(), "tp-missing".into()])
            .unwrap();
        assert_eq!(found.len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_delivery_records() {
        let (store, dir) = temp_store("deliveries");
        store
            .record_delivery_failure("cap-1", "tp-1", 1, "provider unavailable: 503", false)
            .unwrap();
        let recs = store.deliveries_for_capsule("cap-1").unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, DeliveryState::Pending);
        assert_eq!(recs[0].attempts, 1);

        store
            .record_delivery_sent("cap-1", "tp-1", 2, "msg-123")
            .unwrap();
        let recs = store.deliveries_for_capsule("cap-1").unwrap();
        assert_eq!(recs[0].status, DeliveryState::Sent);
        assert_eq!(recs[0].message_id.as_deref(), Some("msg-123"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_notification_log_appends() {
        let (store, dir) = temp_store("notifications");
        store
            .log_notification("cap-1", "tp-1", "a@example.com", "sent", None, Some("m-1"))
            .unwrap();
        store
            .log_notification(
                "cap-1",
                "tp-2",
                "b@example.com",
                "failed",
                Some("rate limited"),
                None,
            )
            .unwrap();

        let entries = store.recent_notifications(10).unwrap();
        assert_eq!(entries.len(), 2);
        // Most recent first.
        assert_eq!(entries[0].outcome, "failed");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_token_lookup() {
        let (store, dir) = temp_store("tokens");
        store.insert_api_token("tok-abc", "u-1").unwrap();
        assert_eq!(
            store.user_for_token("tok-abc").unwrap().as_deref(),
            Some("u-1")
        );
        assert!(store.user_for_token("tok-missing").unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
