//! In-memory account directory.
//!
//! Used for local runs (seeded from a JSON file) and for tests. Emails are
//! matched case-insensitively.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use super::{Account, AccountDirectory, AccountId, DirectoryError};

/// A member account as held by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

impl AccountRecord {
    pub fn new(id: &str, email: &str, display_name: &str) -> Self {
        Self {
            id: AccountId::from(id),
            email: email.to_string(),
            display_name: display_name.to_string(),
            approved: false,
            approved_at: None,
        }
    }

    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }
}

#[derive(Default)]
struct Records {
    by_id: HashMap<AccountId, AccountRecord>,
    id_by_email: HashMap<String, AccountId>,
}

/// Shared, thread-safe in-memory directory. Clones see the same records.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<RwLock<Records>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = AccountRecord>) -> Self {
        let mut state = Records::default();
        for record in records {
            state
                .id_by_email
                .insert(normalize_email(&record.email), record.id.clone());
            state.by_id.insert(record.id.clone(), record);
        }
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Load records from a JSON array file.
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory seed {}", path.display()))?;
        let records: Vec<AccountRecord> =
            serde_json::from_str(&raw).context("Failed to parse directory seed")?;

        info!(
            path = %path.display(),
            accounts = records.len(),
            "memory_directory_seeded"
        );

        Ok(Self::with_records(records))
    }

    /// Snapshot of a record.
    pub async fn get(&self, id: &AccountId) -> Option<AccountRecord> {
        self.inner.read().await.by_id.get(id).cloned()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl AccountDirectory for MemoryDirectory {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError> {
        let state = self.inner.read().await;
        let account = state
            .id_by_email
            .get(&normalize_email(email))
            .and_then(|id| state.by_id.get(id))
            .map(|record| Account {
                id: record.id.clone(),
                email: record.email.clone(),
            });
        Ok(account)
    }

    async fn is_approved(&self, id: &AccountId) -> Result<bool, DirectoryError> {
        let state = self.inner.read().await;
        state
            .by_id
            .get(id)
            .map(|record| record.approved)
            .ok_or_else(|| DirectoryError::AccountVanished(id.clone()))
    }

    async fn approve(&self, id: &AccountId) -> Result<(), DirectoryError> {
        let mut state = self.inner.write().await;
        let record = state
            .by_id
            .get_mut(id)
            .ok_or_else(|| DirectoryError::AccountVanished(id.clone()))?;

        if !record.approved {
            record.approved = true;
            record.approved_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn display_name(&self, id: &AccountId) -> Result<String, DirectoryError> {
        let state = self.inner.read().await;
        state
            .by_id
            .get(id)
            .map(|record| record.display_name.clone())
            .ok_or_else(|| DirectoryError::AccountVanished(id.clone()))
    }
}
