//! Error taxonomy for webhook handling.
//!
//! Every variant is terminal for the request. `Display` is the audit log line;
//! [`WebhookError::public_message`] is what the caller sees.

use axum::http::StatusCode;
use thiserror::Error;

use crate::audit::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("Request was made without a Stripe-Signature header")]
    MissingSignature,

    #[error("Invalid Stripe-Signature header ('{header}')")]
    InvalidSignature { header: String },

    #[error("Got an authenticated request that wasn't application/json (was {content_type})")]
    UnsupportedContentType { content_type: String },

    #[error("Event body is not a valid JSON object: {reason}")]
    MalformedJson { reason: String },

    #[error("Event {event_id} is an unsupported event type ({event_type})")]
    UnsupportedEventType {
        event_id: String,
        event_type: String,
    },

    #[error("Event {event_id} doesn't have a billing email in the expected place")]
    MissingBillingEmail { event_id: String },

    #[error("Tried to approve {email}, but the user didn't exist")]
    UserNotFound { email: String },

    #[error("Tried to approve {email} ({display_name}), but they were already approved")]
    AlreadyApproved { email: String, display_name: String },

    #[error("Account directory unavailable: {reason}")]
    DirectoryUnavailable { reason: String },
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingSignature | Self::InvalidSignature { .. } => StatusCode::UNAUTHORIZED,
            Self::UnsupportedContentType { .. }
            | Self::MalformedJson { .. }
            | Self::UnsupportedEventType { .. }
            | Self::MissingBillingEmail { .. }
            | Self::AlreadyApproved { .. } => StatusCode::BAD_REQUEST,
            Self::UserNotFound { .. } => StatusCode::NOT_FOUND,
            Self::DirectoryUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code returned in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSignature => "missing_signature",
            Self::InvalidSignature { .. } => "invalid_signature",
            Self::UnsupportedContentType { .. } => "invalid_content_type",
            Self::MalformedJson { .. } => "malformed_json",
            Self::UnsupportedEventType { .. } => "unsupported_type",
            Self::MissingBillingEmail { .. } => "missing_email_address",
            Self::UserNotFound { .. } => "user_missing",
            Self::AlreadyApproved { .. } => "user_already_approved",
            Self::DirectoryUnavailable { .. } => "directory_unavailable",
        }
    }

    /// Fixed message for the response body. Never includes request data.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingSignature => "Missing Stripe-Signature header",
            Self::InvalidSignature { .. } => "Invalid signature",
            Self::UnsupportedContentType { .. } => {
                "Invalid content type (application/json expected)"
            }
            Self::MalformedJson { .. } => "Request body is not a valid JSON object",
            Self::UnsupportedEventType { .. } => "Unsupported/missing event type",
            Self::MissingBillingEmail { .. } => "Billing email address is missing",
            Self::UserNotFound { .. } => "There isn't an associated user for this email address",
            Self::AlreadyApproved { .. } => {
                "This user is already approved! Are you sure they're meant to pay membership twice?"
            }
            Self::DirectoryUnavailable { .. } => "Account directory is unavailable, retry later",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingSignature | Self::InvalidSignature { .. } | Self::UserNotFound { .. } => {
                Severity::Warn
            }
            Self::UnsupportedContentType { .. }
            | Self::MalformedJson { .. }
            | Self::UnsupportedEventType { .. }
            | Self::MissingBillingEmail { .. }
            | Self::DirectoryUnavailable { .. } => Severity::Error,
            Self::AlreadyApproved { .. } => Severity::Info,
        }
    }
}
