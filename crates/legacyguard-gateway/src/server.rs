//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use legacyguard_core::LegacyGuardConfig;
use legacyguard_core::traits::Mailer;
use legacyguard_delivery::Dispatcher;
use legacyguard_store::Store;

use super::{auth, routes};

/// Shared state for the gateway server.
pub struct AppState {
    pub config: LegacyGuardConfig,
    pub store: Arc<Store>,
    pub mailer: Arc<dyn Mailer>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the Axum router with all routes.
pub fn build_router(shared: Arc<AppState>) -> Router {
    // Protected routes — require a valid bearer token
    let protected = Router::new()
        .route(
            "/api/time-capsule",
            post(routes::create_time_capsule).get(routes::list_time_capsules),
        )
        .route(
            "/api/time-capsule/{id}",
            put(routes::update_time_capsule).delete(routes::delete_time_capsule),
        )
        .route(
            "/api/trusted-people",
            post(routes::create_trusted_person).get(routes::list_trusted_people),
        )
        .route("/api/notifications", get(routes::list_notifications))
        .route("/api/delivery/run", post(routes::run_delivery_pass))
        .route("/api/emergency/activate", post(routes::emergency_activate))
        .route("/api/wills", post(routes::create_will).get(routes::list_wills))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            auth::require_bearer,
        ));

    // Public routes — webhook auth is the HMAC signature itself
    let public = Router::new()
        .route("/health", get(routes::health_check))
        .route(
            "/api/webhooks/will-validation",
            post(routes::will_validation_webhook),
        );

    protected
        .merge(public)
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Restrict CORS origins in production via env var
            // Example: LEGACYGUARD_CORS_ORIGINS=https://app.legacyguard.example
            if let Ok(origins_str) = std::env::var("LEGACYGUARD_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server. Runs until the process exits.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let shared = Arc::new(state);
    let app = build_router(shared);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
