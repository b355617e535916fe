//! Stripe event parsing and validation.
//!
//! The body is walked as a `serde_json::Value` so that a missing or oddly
//! typed field at any depth degrades to a typed error instead of failing the
//! whole deserialization.

use serde_json::Value;

use crate::error::WebhookError;

/// The only content type accepted for event bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// The only event type that activates an account.
pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";

const BILLING_EMAIL_POINTER: &str = "/data/object/charges/data/0/billing_details/email";

/// Fields the gateway needs from a Stripe event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Stripe event id (`evt_...`). Empty if the event carried none.
    pub id: String,
    pub event_type: String,
    pub billing_email: Option<String>,
}

impl WebhookEvent {
    /// Extract fields from a decoded event object. Never fails.
    pub fn from_value(value: &Value) -> Self {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let billing_email = value
            .pointer(BILLING_EMAIL_POINTER)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string);

        Self {
            id,
            event_type,
            billing_email,
        }
    }

    /// Event id for log lines.
    pub fn display_id(&self) -> &str {
        if self.id.is_empty() {
            "<unknown>"
        } else {
            &self.id
        }
    }
}

/// Parse and validate a verified event body.
///
/// On success the returned event always carries a billing email.
pub fn parse_event(body: &[u8], content_type: &str) -> Result<WebhookEvent, WebhookError> {
    if content_type != JSON_CONTENT_TYPE {
        return Err(WebhookError::UnsupportedContentType {
            content_type: content_type.to_string(),
        });
    }

    let value: Value = serde_json::from_slice(body).map_err(|e| WebhookError::MalformedJson {
        reason: e.to_string(),
    })?;

    if !value.is_object() {
        return Err(WebhookError::MalformedJson {
            reason: "top-level value is not an object".to_string(),
        });
    }

    let event = WebhookEvent::from_value(&value);

    if event.event_type != PAYMENT_SUCCEEDED {
        return Err(WebhookError::UnsupportedEventType {
            event_id: event.display_id().to_string(),
            event_type: if event.event_type.is_empty() {
                "<missing>".to_string()
            } else {
                event.event_type.clone()
            },
        });
    }

    if event.billing_email.is_none() {
        return Err(WebhookError::MissingBillingEmail {
            event_id: event.display_id().to_string(),
        });
    }

    Ok(event)
}
