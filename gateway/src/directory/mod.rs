//! External account directory.
//!
//! The gateway never owns member accounts. It looks them up by billing email
//! and flips their approval flag through the [`AccountDirectory`] port.
//!
//! Adapters:
//! - [`MemoryDirectory`]: in-process records, optionally seeded from JSON
//! - [`HttpDirectory`]: REST directory reached with `reqwest`

pub mod http;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::http::HttpDirectory;
pub use self::memory::{AccountRecord, MemoryDirectory};

/// Directory-assigned account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        AccountId(s.to_string())
    }
}

/// Result of an email lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
}

/// Directory failures. All of them mean "try again later", never "no such user".
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("directory request failed: {0}")]
    Transport(String),

    #[error("directory returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("account {0} disappeared during processing")]
    AccountVanished(AccountId),
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError>;

    async fn is_approved(&self, id: &AccountId) -> Result<bool, DirectoryError>;

    async fn approve(&self, id: &AccountId) -> Result<(), DirectoryError>;

    async fn display_name(&self, id: &AccountId) -> Result<String, DirectoryError>;
}
