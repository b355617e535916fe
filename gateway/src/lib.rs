//! Membergate - Stripe webhook gateway for member activation.
//!
//! Receives signed Stripe payment events, verifies them, and approves the
//! member account whose email paid.
//!
//! ## Architecture
//!
//! ```text
//! Stripe → POST /event → SignatureVerifier → parse_event → AccountDirectory
//!                              ↘ AuditLog (one line per request) ↙
//! ```

pub mod activation;
pub mod audit;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod web;

// Re-export commonly used types
pub use activation::{ActivationService, IncomingRequest};
pub use audit::{AuditLog, AuditWriter, FileSink, LogSink, MemorySink, Severity};
pub use config::{Config, ConfigError};
pub use directory::{AccountDirectory, HttpDirectory, MemoryDirectory};
pub use error::WebhookError;
pub use event::{parse_event, WebhookEvent};
pub use web::AppState;
