//! Member activation from verified Stripe payment events.
//!
//! ## Processing Flow
//!
//! ```text
//! IncomingRequest → signature → content type → parse_event → directory lookup → approve
//! ```
//!
//! Each step can short-circuit with a [`WebhookError`]. Exactly one audit entry
//! is written per request, whatever the outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use tracing::info;

use crate::audit::{AuditLog, Severity};
use crate::directory::{AccountDirectory, DirectoryError};
use crate::error::WebhookError;
use crate::event::{parse_event, JSON_CONTENT_TYPE};
use crate::web::signature::{SignatureVerifier, SIGNATURE_HEADER};

/// An inbound webhook request, as received.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    headers: HeaderMap,
    body: Bytes,
}

impl IncomingRequest {
    pub fn new(headers: HeaderMap, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Header value by case-insensitive name. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> &str {
        self.header(header::CONTENT_TYPE.as_str()).unwrap_or_default()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Verifies webhook requests and approves the matching account.
pub struct ActivationService {
    verifier: SignatureVerifier,
    directory: Arc<dyn AccountDirectory>,
    audit: AuditLog,
    directory_timeout: Duration,
}

impl ActivationService {
    pub fn new(
        verifier: SignatureVerifier,
        directory: Arc<dyn AccountDirectory>,
        audit: AuditLog,
        directory_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            directory,
            audit,
            directory_timeout,
        }
    }

    /// Handle one request and record its outcome in the audit log.
    pub async fn handle(&self, request: &IncomingRequest) -> Result<String, WebhookError> {
        let outcome = self.process(request).await;

        match &outcome {
            Ok(message) => self.audit.log(Severity::Info, message.clone()),
            Err(e) => self.audit.log(e.severity(), e.to_string()),
        }

        outcome
    }

    async fn process(&self, request: &IncomingRequest) -> Result<String, WebhookError> {
        let signature = match request.header(SIGNATURE_HEADER) {
            Some(value) if !value.trim().is_empty() => value,
            _ => return Err(WebhookError::MissingSignature),
        };

        if !self.verifier.verify(signature, request.body()) {
            return Err(WebhookError::InvalidSignature {
                header: signature.to_string(),
            });
        }

        let content_type = request.content_type();
        if content_type != JSON_CONTENT_TYPE {
            return Err(WebhookError::UnsupportedContentType {
                content_type: content_type.to_string(),
            });
        }

        let event = parse_event(request.body(), content_type)?;
        let email = match event.billing_email.as_deref() {
            Some(email) => email,
            None => {
                return Err(WebhookError::MissingBillingEmail {
                    event_id: event.display_id().to_string(),
                })
            }
        };

        info!(event_id = %event.display_id(), email = %email, "activation_lookup");

        let account = self
            .bounded(self.directory.find_account_by_email(email))
            .await?
            .ok_or_else(|| WebhookError::UserNotFound {
                email: email.to_string(),
            })?;

        let display_name = self.bounded(self.directory.display_name(&account.id)).await?;

        if self.bounded(self.directory.is_approved(&account.id)).await? {
            return Err(WebhookError::AlreadyApproved {
                email: account.email,
                display_name,
            });
        }

        self.bounded(self.directory.approve(&account.id)).await?;

        info!(
            event_id = %event.display_id(),
            account_id = %account.id,
            "activation_approved"
        );

        Ok(format!(
            "Approved membership for {} ({})!",
            display_name, account.email
        ))
    }

    /// Run a directory call under the configured timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T, WebhookError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        let result = match tokio::time::timeout(self.directory_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(self.directory_timeout)),
        };

        result.map_err(|e| WebhookError::DirectoryUnavailable {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditWriter, MemorySink};
    use crate::directory::{Account, AccountId, AccountRecord, MemoryDirectory};
    use crate::web::signature::sign_header;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "whsec_activation_test";

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn service(
        directory: Arc<dyn AccountDirectory>,
    ) -> (ActivationService, AuditWriter, MemorySink) {
        let sink = MemorySink::new();
        let (audit, writer) = AuditLog::spawn(sink.clone());
        let verifier = SignatureVerifier::new(
            SecretString::new(SECRET.to_string()),
            Duration::from_secs(300),
        );
        let svc = ActivationService::new(verifier, directory, audit, Duration::from_millis(200));
        (svc, writer, sink)
    }

    fn payment_body(email: &str) -> Vec<u8> {
        json!({
            "id": "evt_123",
            "type": "payment_intent.succeeded",
            "data": {"object": {"charges": {"data": [
                {"billing_details": {"email": email}}
            ]}}}
        })
        .to_string()
        .into_bytes()
    }

    fn signed_request(body: &[u8], timestamp: i64, content_type: &str) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            HeaderValue::from_str(&sign_header(SECRET, timestamp, body)).unwrap(),
        );
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap(),
        );
        IncomingRequest::new(headers, Bytes::copy_from_slice(body))
    }

    async fn finish(svc: ActivationService, writer: AuditWriter, sink: &MemorySink) -> Vec<String> {
        drop(svc);
        writer.finish().await;
        sink.lines()
    }

    #[tokio::test]
    async fn test_approves_unapproved_member() {
        let dir = MemoryDirectory::with_records([AccountRecord::new("1", "ada@example.com", "Ada")]);
        let (svc, writer, sink) = service(Arc::new(dir.clone()));

        let req = signed_request(&payment_body("ada@example.com"), now(), JSON_CONTENT_TYPE);
        let message = svc.handle(&req).await.unwrap();

        assert_eq!(message, "Approved membership for Ada (ada@example.com)!");
        assert!(dir.get(&AccountId::from("1")).await.unwrap().approved);

        let lines = finish(svc, writer, &sink).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("INFO: Approved membership for Ada (ada@example.com)! ("));
    }

    #[tokio::test]
    async fn test_messages_use_directory_email() {
        let dir = MemoryDirectory::with_records([AccountRecord::new("1", "ada@example.com", "Ada")]);
        let (svc, writer, sink) = service(Arc::new(dir));
        let req = signed_request(&payment_body("ADA@Example.COM"), now(), JSON_CONTENT_TYPE);

        let message = svc.handle(&req).await.unwrap();
        assert_eq!(message, "Approved membership for Ada (ada@example.com)!");

        let err = svc.handle(&req).await.unwrap_err();
        assert_eq!(
            err,
            WebhookError::AlreadyApproved {
                email: "ada@example.com".to_string(),
                display_name: "Ada".to_string(),
            }
        );
        finish(svc, writer, &sink).await;
    }

    #[tokio::test]
    async fn test_display_name_with_line_break_is_one_audit_line() {
        let dir = MemoryDirectory::with_records([AccountRecord::new(
            "1",
            "ada@example.com",
            "Ada\nERROR: forged entry (2020-01-01 00:00:00)",
        )]);
        let (svc, writer, sink) = service(Arc::new(dir));
        let req = signed_request(&payment_body("ada@example.com"), now(), JSON_CONTENT_TYPE);

        svc.handle(&req).await.unwrap();

        let lines = finish(svc, writer, &sink).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].matches('\n').count(), 1);
        assert!(lines[0].starts_with("INFO: Approved membership for Ada ERROR: forged entry"));
    }

    #[tokio::test]
    async fn test_replay_is_already_approved() {
        let dir = MemoryDirectory::with_records([AccountRecord::new("1", "ada@example.com", "Ada")]);
        let (svc, writer, sink) = service(Arc::new(dir.clone()));
        let req = signed_request(&payment_body("ada@example.com"), now(), JSON_CONTENT_TYPE);

        svc.handle(&req).await.unwrap();
        let approved_at = dir.get(&AccountId::from("1")).await.unwrap().approved_at;

        let err = svc.handle(&req).await.unwrap_err();
        assert!(matches!(err, WebhookError::AlreadyApproved { .. }));
        assert_eq!(
            dir.get(&AccountId::from("1")).await.unwrap().approved_at,
            approved_at
        );

        let lines = finish(svc, writer, &sink).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("INFO: Tried to approve ada@example.com (Ada)"));
    }

    #[tokio::test]
    async fn test_missing_signature() {
        let (svc, writer, sink) = service(Arc::new(MemoryDirectory::new()));
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        let req = IncomingRequest::new(headers, Bytes::from_static(b"{}"));

        assert_eq!(svc.handle(&req).await.unwrap_err(), WebhookError::MissingSignature);

        let lines = finish(svc, writer, &sink).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("WARN: Request was made without a Stripe-Signature header"));
    }

    #[tokio::test]
    async fn test_signature_checked_before_content_type() {
        let (svc, writer, sink) = service(Arc::new(MemoryDirectory::new()));
        let body = payment_body("ada@example.com");
        let mut req = signed_request(&body, now(), "text/plain");
        req.body = Bytes::from_static(b"tampered");

        let err = svc.handle(&req).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature { .. }));
        finish(svc, writer, &sink).await;
    }

    #[tokio::test]
    async fn test_stale_signature() {
        let (svc, writer, sink) = service(Arc::new(MemoryDirectory::new()));
        let req = signed_request(&payment_body("ada@example.com"), now() - 3600, JSON_CONTENT_TYPE);

        let err = svc.handle(&req).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature { .. }));
        finish(svc, writer, &sink).await;
    }

    #[tokio::test]
    async fn test_wrong_content_type_after_valid_signature() {
        let (svc, writer, sink) = service(Arc::new(MemoryDirectory::new()));
        let req = signed_request(&payment_body("ada@example.com"), now(), "text/plain");

        let err = svc.handle(&req).await.unwrap_err();
        assert_eq!(
            err,
            WebhookError::UnsupportedContentType {
                content_type: "text/plain".to_string()
            }
        );

        let lines = finish(svc, writer, &sink).await;
        assert!(lines[0].starts_with("ERROR: Got an authenticated request"));
    }

    #[tokio::test]
    async fn test_unknown_member() {
        let (svc, writer, sink) = service(Arc::new(MemoryDirectory::new()));
        let req = signed_request(&payment_body("ghost@example.com"), now(), JSON_CONTENT_TYPE);

        let err = svc.handle(&req).await.unwrap_err();
        assert_eq!(
            err,
            WebhookError::UserNotFound {
                email: "ghost@example.com".to_string()
            }
        );

        let lines = finish(svc, writer, &sink).await;
        assert!(lines[0].starts_with("WARN: Tried to approve ghost@example.com, but the user didn't exist"));
    }

    struct SlowDirectory;

    #[async_trait]
    impl AccountDirectory for SlowDirectory {
        async fn find_account_by_email(
            &self,
            _email: &str,
        ) -> Result<Option<Account>, DirectoryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn is_approved(&self, _id: &AccountId) -> Result<bool, DirectoryError> {
            Ok(false)
        }

        async fn approve(&self, _id: &AccountId) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn display_name(&self, _id: &AccountId) -> Result<String, DirectoryError> {
            Ok(String::new())
        }
    }

    /// Answers every lookup with a non-success status.
    struct ErrorPageDirectory {
        body: String,
    }

    #[async_trait]
    impl AccountDirectory for ErrorPageDirectory {
        async fn find_account_by_email(
            &self,
            _email: &str,
        ) -> Result<Option<Account>, DirectoryError> {
            Err(DirectoryError::UnexpectedStatus {
                status: 500,
                body: self.body.clone(),
            })
        }

        async fn is_approved(&self, _id: &AccountId) -> Result<bool, DirectoryError> {
            Ok(false)
        }

        async fn approve(&self, _id: &AccountId) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn display_name(&self, _id: &AccountId) -> Result<String, DirectoryError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_multiline_directory_error_is_one_audit_line() {
        let dir = ErrorPageDirectory {
            body: "<html>\n<body>oops</body>\n</html>".to_string(),
        };
        let (svc, writer, sink) = service(Arc::new(dir));
        let req = signed_request(&payment_body("ada@example.com"), now(), JSON_CONTENT_TYPE);

        let err = svc.handle(&req).await.unwrap_err();
        assert!(matches!(err, WebhookError::DirectoryUnavailable { .. }));

        let lines = finish(svc, writer, &sink).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].matches('\n').count(), 1);
        assert!(lines[0].contains("<html> <body>oops</body> </html>"));
    }

    #[tokio::test]
    async fn test_directory_timeout_is_unavailable_not_missing() {
        let (svc, writer, sink) = service(Arc::new(SlowDirectory));
        let req = signed_request(&payment_body("ada@example.com"), now(), JSON_CONTENT_TYPE);

        let err = svc.handle(&req).await.unwrap_err();
        assert!(matches!(err, WebhookError::DirectoryUnavailable { .. }));

        let lines = finish(svc, writer, &sink).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERROR: Account directory unavailable"));
    }
}
