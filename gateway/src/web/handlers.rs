//! Webhook endpoint handlers.
//!
//! The Stripe handler hands the raw request to [`ActivationService`] and turns
//! the outcome into a response:
//! - success: `200` with a plain-text confirmation
//! - failure: the error's status with a JSON `{code, message}` body

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activation::{ActivationService, IncomingRequest};
use crate::error::WebhookError;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub activation: Arc<ActivationService>,
}

impl AppState {
    pub fn new(config: Config, activation: ActivationService) -> Self {
        Self {
            config: Arc::new(config),
            activation: Arc::new(activation),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Stripe Webhook
// =============================================================================

/// JSON body returned for every failed webhook.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.public_message().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Stripe webhook endpoint.
///
/// The body is taken as raw bytes: the signature covers the exact bytes sent.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, WebhookError> {
    info!(
        body_length = body.len(),
        has_signature = headers.contains_key("stripe-signature"),
        "stripe_webhook_received"
    );

    let request = IncomingRequest::new(headers, body);
    state.activation.handle(&request).await
}
