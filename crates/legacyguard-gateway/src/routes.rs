//! API route handlers for the gateway.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;

use legacyguard_core::types::{
    CapsuleStatus, MessageType, OutgoingEmail, TimeCapsuleMessage, TrustedPerson, ProfileStatus,
    UnlockCondition,
};
use legacyguard_store::{CapsuleUpdate, GeneratedWill, WillValidationRecord};
use legacyguard_will::WillContent;

use super::auth::AuthedUser;
use super::server::AppState;

fn json_value(value: Value) -> Response {
    Json(value).into_response()
}

fn json_created(value: Value) -> Response {
    (StatusCode::CREATED, Json(value)).into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> Response {
    tracing::error!("{context}: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "legacyguard-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ─── Time capsules ──────────────────────────────────────

/// Which required fields are absent from a capsule-create payload.
fn missing_capsule_fields(body: &Value) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if body["title"].as_str().unwrap_or("").is_empty() {
        missing.push("title");
    }
    let message_type = body["messageType"].as_str().unwrap_or("");
    if message_type.is_empty() {
        missing.push("messageType");
    }
    if body["recipientIds"]
        .as_array()
        .is_none_or(|a| a.is_empty())
    {
        missing.push("recipientIds");
    }
    let condition = body["unlockCondition"].as_str().unwrap_or("");
    if condition.is_empty() {
        missing.push("unlockCondition");
    }
    if condition == "date" && body["unlockDate"].as_str().unwrap_or("").is_empty() {
        missing.push("unlockDate");
    }
    if message_type == "text" && body["textContent"].as_str().unwrap_or("").is_empty() {
        missing.push("textContent");
    }
    missing
}

/// Create a time capsule. New capsules always start locked.
pub async fn create_time_capsule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Json(body): Json<Value>,
) -> Response {
    let missing = missing_capsule_fields(&body);
    if !missing.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            &format!("Missing required fields: {}", missing.join(", ")),
        );
    }

    let Some(message_type) = MessageType::parse(body["messageType"].as_str().unwrap_or(""))
    else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid messageType");
    };
    let Some(unlock_condition) =
        UnlockCondition::parse(body["unlockCondition"].as_str().unwrap_or(""))
    else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid unlockCondition");
    };

    let unlock_date = match unlock_condition {
        UnlockCondition::AfterPassing => None,
        UnlockCondition::Date => {
            let raw = body["unlockDate"].as_str().unwrap_or("");
            match DateTime::parse_from_rfc3339(raw) {
                Ok(d) => Some(d.with_timezone(&Utc)),
                Err(_) => {
                    return json_error(
                        StatusCode::BAD_REQUEST,
                        "unlockDate must be an RFC 3339 timestamp",
                    );
                }
            }
        }
    };

    let recipient_ids: Vec<String> = body["recipientIds"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let now = Utc::now();
    let capsule = TimeCapsuleMessage {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.0.clone(),
        title: body["title"].as_str().unwrap_or("").to_string(),
        message_type,
        text_content: body["textContent"].as_str().map(String::from),
        attachment_url: body["attachmentUrl"].as_str().map(String::from),
        recipient_ids,
        unlock_condition,
        unlock_date,
        status: CapsuleStatus::Locked,
        created_at: now,
        updated_at: now,
        unlocked_at: None,
        delivered_at: None,
    };

    match state.store.insert_capsule(&capsule) {
        Ok(()) => json_created(json!({"data": capsule})),
        Err(e) => internal_error("Create capsule failed", e),
    }
}

/// List the authenticated user's capsules.
pub async fn list_time_capsules(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    match state.store.list_capsules_for_user(&user.0) {
        Ok(capsules) => json_value(json!({"data": capsules})),
        Err(e) => internal_error("List capsules failed", e),
    }
}

/// Edit a capsule. Only the owner, and only while it is still locked.
pub async fn update_time_capsule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<String>,
    Json(update): Json<CapsuleUpdate>,
) -> Response {
    // The merged row must still satisfy the date-condition invariant.
    match state.store.get_capsule(&id) {
        Ok(Some(current)) if current.user_id == user.0 => {
            let condition = update.unlock_condition.unwrap_or(current.unlock_condition);
            if condition == UnlockCondition::Date
                && update.unlock_date.or(current.unlock_date).is_none()
            {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "unlockDate is required when unlockCondition is 'date'",
                );
            }
        }
        Ok(_) => {
            return json_error(
                StatusCode::NOT_FOUND,
                "Time capsule not found or cannot be modified",
            );
        }
        Err(e) => return internal_error("Update capsule failed", e),
    }

    match state.store.update_locked_capsule(&id, &user.0, &update) {
        Ok(Some(capsule)) => json_value(json!({"data": capsule})),
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            "Time capsule not found or cannot be modified",
        ),
        Err(e) => internal_error("Update capsule failed", e),
    }
}

/// Delete a capsule. Only the owner, and only while it is still locked.
pub async fn delete_time_capsule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_locked_capsule(&id, &user.0) {
        Ok(true) => json_value(json!({"message": "Time capsule deleted"})),
        Ok(false) => json_error(
            StatusCode::NOT_FOUND,
            "Time capsule not found or cannot be modified",
        ),
        Err(e) => internal_error("Delete capsule failed", e),
    }
}

// ─── Trusted people ──────────────────────────────────────

pub async fn create_trusted_person(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Json(body): Json<Value>,
) -> Response {
    let name = body["name"].as_str().unwrap_or("");
    let email = body["email"].as_str().unwrap_or("");
    if name.is_empty() || email.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "Missing required fields: name, email",
        );
    }

    let person = TrustedPerson {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.0.clone(),
        name: name.to_string(),
        email: email.to_string(),
        relationship: body["relationship"].as_str().unwrap_or("").to_string(),
        is_emergency_contact: body["isEmergencyContact"].as_bool().unwrap_or(false),
        created_at: Utc::now(),
    };

    match state.store.insert_trusted_person(&person) {
        Ok(()) => json_created(json!({"data": person})),
        Err(e) => internal_error("Create trusted person failed", e),
    }
}

pub async fn list_trusted_people(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    match state.store.list_trusted_people(&user.0) {
        Ok(people) => json_value(json!({"data": people})),
        Err(e) => internal_error("List trusted people failed", e),
    }
}

// ─── Notification audit log ──────────────────────────────────────

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(100)
        .min(1000);
    match state.store.recent_notifications(limit) {
        Ok(entries) => json_value(json!({"data": entries})),
        Err(e) => internal_error("List notifications failed", e),
    }
}

// ─── Delivery ──────────────────────────────────────

/// Run one dispatch pass on demand and return its report.
pub async fn run_delivery_pass(State(state): State<Arc<AppState>>) -> Response {
    match state.dispatcher.run_pass().await {
        Ok(report) => json_value(json!({"ok": true, "report": report})),
        Err(e) => internal_error("Dispatch pass aborted", e),
    }
}

// ─── Emergency activation ──────────────────────────────────────

fn emergency_notice(
    contact: &TrustedPerson,
    user_name: &str,
    guardian_name: &str,
    notes: &str,
) -> OutgoingEmail {
    let subject = format!("Emergency activation for {user_name}");
    let notes_block = if notes.is_empty() {
        String::new()
    } else {
        format!("<p>Notes from the guardian: {notes}</p>")
    };
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>Emergency activation</h2>
  <p>Dear {contact_name},</p>
  <p>{guardian_name} has confirmed the passing of {user_name} on LegacyGuard.
     As one of their emergency contacts, you may now be needed to help carry
     out their wishes.</p>
  {notes_block}
  <p>Best regards,<br>The LegacyGuard Team</p>
</div>"#,
        contact_name = contact.name,
    );
    let text = format!(
        "Dear {contact_name},\n\n\
         {guardian_name} has confirmed the passing of {user_name} on LegacyGuard. \
         As one of their emergency contacts, you may now be needed to help carry \
         out their wishes.\n\n{notes}\n\nBest regards,\nThe LegacyGuard Team",
        contact_name = contact.name,
    );
    OutgoingEmail {
        to_email: contact.email.clone(),
        to_name: contact.name.clone(),
        subject,
        html,
        text,
    }
}

/// Guardian-confirmed passing: marks the profile deceased and notifies the
/// remaining emergency contacts. After-passing capsules become due on the
/// next dispatch pass.
pub async fn emergency_activate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let user_id = body["userId"].as_str().unwrap_or("");
    let guardian_id = body["guardianId"].as_str().unwrap_or("");
    if user_id.is_empty() || guardian_id.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "Missing required fields: userId, guardianId",
        );
    }
    let notes = body["notes"].as_str().unwrap_or("");

    let guardian = match state.store.get_trusted_people(&[guardian_id.to_string()]) {
        Ok(people) => people
            .into_iter()
            .find(|p| p.user_id == user_id && p.is_emergency_contact),
        Err(e) => return internal_error("Emergency activation failed", e),
    };
    let Some(guardian) = guardian else {
        return json_error(
            StatusCode::FORBIDDEN,
            "Guardian is not an emergency contact for this user",
        );
    };

    let profile = match state.store.get_profile(user_id) {
        Ok(Some(p)) => p,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => return internal_error("Emergency activation failed", e),
    };

    if let Err(e) = state
        .store
        .set_profile_status(user_id, ProfileStatus::Deceased)
    {
        return internal_error("Emergency activation failed", e);
    }
    tracing::info!(
        "🚨 Emergency activation: {} confirmed by guardian {}",
        user_id,
        guardian.name
    );

    let contacts = match state.store.emergency_contacts(user_id) {
        Ok(c) => c,
        Err(e) => return internal_error("Emergency activation failed", e),
    };

    let audit_ref = format!("emergency:{user_id}");
    let mut notified = 0;
    for contact in contacts.iter().filter(|c| c.id != guardian_id) {
        let email = emergency_notice(contact, &profile.full_name, &guardian.name, notes);
        match state.mailer.send(&email).await {
            Ok(message_id) => {
                notified += 1;
                state
                    .store
                    .log_notification(
                        &audit_ref,
                        &contact.id,
                        &contact.email,
                        "sent",
                        None,
                        Some(&message_id),
                    )
                    .ok();
            }
            Err(e) => {
                tracing::warn!("Emergency notice to {} failed: {e}", contact.email);
                state
                    .store
                    .log_notification(
                        &audit_ref,
                        &contact.id,
                        &contact.email,
                        "failed",
                        Some(&e.to_string()),
                        None,
                    )
                    .ok();
            }
        }
    }

    json_value(json!({
        "ok": true,
        "status": "deceased",
        "contactsNotified": notified,
    }))
}

// ─── Wills ──────────────────────────────────────

pub async fn create_will(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
    Json(body): Json<Value>,
) -> Response {
    let country_code = body["countryCode"].as_str().unwrap_or("");
    if country_code.is_empty() || body.get("content").is_none() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "Missing required fields: countryCode, content",
        );
    }

    let now = Utc::now();
    let will = GeneratedWill {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.0.clone(),
        country_code: country_code.to_string(),
        content: body["content"].clone(),
        status: "draft".into(),
        validation_status: "pending".into(),
        created_at: now,
        updated_at: now,
    };

    match state.store.insert_will(&will) {
        Ok(()) => json_created(json!({"data": will})),
        Err(e) => internal_error("Create will failed", e),
    }
}

pub async fn list_wills(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    match state.store.list_wills_for_user(&user.0) {
        Ok(wills) => json_value(json!({"data": wills})),
        Err(e) => internal_error("List wills failed", e),
    }
}

// ─── Will-validation webhook ──────────────────────────────────────

/// Constant-time check of an `x-webhook-signature` hex HMAC-SHA256 over
/// the raw request body.
fn verify_webhook_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// POST endpoint for external legal-validation services.
pub async fn will_validation_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let secret = &state.config.gateway.webhook_secret;
    if secret.is_empty() {
        return json_error(StatusCode::NOT_FOUND, "Webhook not configured");
    }

    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_webhook_signature(secret, &body, signature) {
        return json_error(StatusCode::UNAUTHORIZED, "Invalid webhook signature");
    }

    let request: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };
    let will_id = request["willId"].as_str().unwrap_or("");
    if will_id.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Missing required fields: willId");
    }
    let validation_type = request["validationType"].as_str().unwrap_or("full");

    let will = match state.store.get_will(will_id) {
        Ok(Some(w)) => w,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Will not found"),
        Err(e) => return internal_error("Will validation failed", e),
    };

    let country_code = match request["countryCode"].as_str() {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => will.country_code.clone(),
    };
    let content_value = match request.get("willContent") {
        Some(v) if !v.is_null() => v.clone(),
        _ => will.content.clone(),
    };
    let content: WillContent = serde_json::from_value(content_value).unwrap_or_default();

    let outcome = legacyguard_will::validate(&country_code, &content);

    let record = WillValidationRecord {
        will_id: will.id.clone(),
        validation_type: validation_type.to_string(),
        is_valid: outcome.is_valid,
        issues: serde_json::to_value(&outcome.issues).unwrap_or(Value::Array(Vec::new())),
        recommendations: serde_json::to_value(&outcome.recommendations)
            .unwrap_or(Value::Array(Vec::new())),
        validated_at: outcome.validated_at,
    };
    if let Err(e) = state.store.record_will_validation(&record) {
        tracing::error!("Storing validation result failed: {e}");
    }

    let status_update = if outcome.is_valid {
        state.store.mark_will_validated(&will.id)
    } else {
        state.store.mark_will_needs_revision(&will.id)
    };
    if let Err(e) = status_update {
        tracing::error!("Updating will status failed: {e}");
    }

    json_value(json!(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let secret = "whsec-123";
        let payload = br#"{"willId":"w-1"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature(secret, payload, &signature));
        assert!(!verify_webhook_signature("other-secret", payload, &signature));
        assert!(!verify_webhook_signature(secret, b"tampered", &signature));
        assert!(!verify_webhook_signature(secret, payload, "not-hex"));
        assert!(!verify_webhook_signature(secret, payload, ""));
    }

    #[test]
    fn test_missing_capsule_fields() {
        let complete = json!({
            "title": "Letters",
            "messageType": "text",
            "textContent": "hello",
            "recipientIds": ["tp-1"],
            "unlockCondition": "date",
            "unlockDate": "2030-01-01T00:00:00Z",
        });
        assert!(missing_capsule_fields(&complete).is_empty());

        let empty = json!({});
        let missing = missing_capsule_fields(&empty);
        assert!(missing.contains(&"title"));
        assert!(missing.contains(&"messageType"));
        assert!(missing.contains(&"recipientIds"));
        assert!(missing.contains(&"unlockCondition"));

        // unlockDate only required for date-conditioned capsules.
        let after_passing = json!({
            "title": "Letters",
            "messageType": "photo",
            "recipientIds": ["tp-1"],
            "unlockCondition": "after_passing",
        });
        assert!(missing_capsule_fields(&after_passing).is_empty());

        let date_without = json!({
            "title": "Letters",
            "messageType": "photo",
            "recipientIds": ["tp-1"],
            "unlockCondition": "date",
        });
        assert_eq!(missing_capsule_fields(&date_without), vec!["unlockDate"]);
    }
}
