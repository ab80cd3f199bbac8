//! Bearer-token auth middleware.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;

use super::server::AppState;

/// The authenticated user's profile id, inserted into request extensions
/// for handlers behind the middleware.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub String);

/// Validates `Authorization: Bearer <token>` against the api_tokens table.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token.is_empty() {
        return error_response(StatusCode::UNAUTHORIZED, "Missing bearer token");
    }

    match state.store.user_for_token(token) {
        Ok(Some(user_id)) => {
            req.extensions_mut().insert(AuthedUser(user_id));
            next.run(req).await
        }
        Ok(None) => error_response(StatusCode::UNAUTHORIZED, "Invalid authentication"),
        Err(e) => {
            tracing::error!("Token lookup failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    axum::response::Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({"error": message}).to_string(),
        ))
        .unwrap_or_default()
}
