//! REST account directory client.
//!
//! Expected endpoints, relative to the base URL:
//! - `GET  accounts?email=<email>` → account JSON, or 404 with
//!   `{"error":"account_not_found"}` when unknown
//! - `GET  accounts/<id>`          → account JSON
//! - `POST accounts/<id>/approve`  → any 2xx
//!
//! A lookup 404 without that body (a wrong `DIRECTORY_URL` path, a proxy page)
//! is a directory failure, not an unknown member.
//!
//! Error bodies are kept for diagnostics but read only up to
//! [`ERROR_BODY_LIMIT`] bytes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{error, info};
use url::Url;

use super::{Account, AccountDirectory, AccountId, DirectoryError};

/// Maximum number of error-body bytes kept in [`DirectoryError::UnexpectedStatus`].
pub const ERROR_BODY_LIMIT: usize = 512;

const ACCOUNT_NOT_FOUND: &str = "account_not_found";

#[derive(Debug, Deserialize)]
struct ErrorDto {
    error: String,
}

/// Account representation served by the directory.
#[derive(Debug, Clone, Deserialize)]
struct AccountDto {
    id: AccountId,
    email: String,
    display_name: String,
    #[serde(default)]
    approved: bool,
}

#[derive(Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpDirectory {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        info!(
            base_url = %base_url,
            timeout_ms = timeout.as_millis() as u64,
            "http_directory_created"
        );

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                DirectoryError::Transport(format!("base URL {} cannot hold a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn map_send_error(&self, url: &Url, e: reqwest::Error) -> DirectoryError {
        if e.is_timeout() {
            error!(url = %url, timeout_ms = self.timeout.as_millis() as u64, "http_directory_timeout");
            DirectoryError::Timeout(self.timeout)
        } else {
            error!(url = %url, error = %e, "http_directory_request_error");
            DirectoryError::Transport(e.to_string())
        }
    }

    async fn fetch_account(&self, id: &AccountId) -> Result<AccountDto, DirectoryError> {
        let url = self.endpoint(&["accounts", &id.0])?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DirectoryError::AccountVanished(id.clone()));
        }

        decode(ensure_success(resp).await?).await
    }
}

async fn ensure_success(resp: Response) -> Result<Response, DirectoryError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = read_capped(resp).await;
    Err(DirectoryError::UnexpectedStatus { status, body })
}

/// Read at most [`ERROR_BODY_LIMIT`] bytes of the body, lossily decoded.
async fn read_capped(mut resp: Response) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < ERROR_BODY_LIMIT {
        match resp.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    buf.truncate(ERROR_BODY_LIMIT);
    String::from_utf8_lossy(&buf).into_owned()
}

async fn decode(resp: Response) -> Result<AccountDto, DirectoryError> {
    resp.json::<AccountDto>()
        .await
        .map_err(|e| DirectoryError::Transport(format!("invalid account payload: {}", e)))
}

#[async_trait]
impl AccountDirectory for HttpDirectory {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError> {
        let url = self.endpoint(&["accounts"])?;
        let resp = self
            .client
            .get(url.clone())
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            let body = read_capped(resp).await;
            return match serde_json::from_str::<ErrorDto>(&body) {
                Ok(dto) if dto.error == ACCOUNT_NOT_FOUND => Ok(None),
                _ => {
                    error!(url = %url, "http_directory_unexpected_not_found");
                    Err(DirectoryError::UnexpectedStatus { status: 404, body })
                }
            };
        }

        let dto = decode(ensure_success(resp).await?).await?;
        Ok(Some(Account {
            id: dto.id,
            email: dto.email,
        }))
    }

    async fn is_approved(&self, id: &AccountId) -> Result<bool, DirectoryError> {
        Ok(self.fetch_account(id).await?.approved)
    }

    async fn approve(&self, id: &AccountId) -> Result<(), DirectoryError> {
        let url = self.endpoint(&["accounts", &id.0, "approve"])?;
        let resp = self
            .client
            .post(url.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DirectoryError::AccountVanished(id.clone()));
        }

        ensure_success(resp).await?;
        info!(account_id = %id, "http_directory_approved");
        Ok(())
    }

    async fn display_name(&self, id: &AccountId) -> Result<String, DirectoryError> {
        Ok(self.fetch_account(id).await?.display_name)
    }
}
