//! Web server module for handling Stripe webhooks.
//!
//! This module provides the HTTP surface of the gateway:
//! - `POST <webhook route>` receives signed Stripe events
//! - `GET /health` for liveness checks

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{health, stripe_webhook, AppState, ErrorBody, HealthResponse};
pub use signature::{verify_signature, SignatureHeader, SignatureVerifier, SIGNATURE_HEADER};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let webhook_route = state.config.webhook_route.clone();

    Router::new()
        .route("/health", get(health))
        .route(&webhook_route, post(stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
