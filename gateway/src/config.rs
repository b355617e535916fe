//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables. The signing secret is
//! the only required value; everything else falls back to a default.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: set {0} or {1}")]
    MissingSecret(&'static str, &'static str),

    #[error("failed to read {name} from {path}: {source}")]
    SecretFile {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} is empty")]
    EmptySecret { name: &'static str },

    #[error("invalid {name} ({value}): {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Path the Stripe webhook endpoint is mounted at
    pub webhook_route: String,

    /// Stripe webhook signing secret (`whsec_...`)
    pub webhook_secret: SecretString,

    /// Maximum clock skew in seconds between the signature timestamp and now
    pub signature_tolerance_secs: u64,

    /// Append-only audit log file
    pub audit_log_path: PathBuf,

    /// Base URL of a REST account directory
    pub directory_url: Option<Url>,

    /// JSON file used to seed the in-memory account directory
    pub directory_seed_path: Option<PathBuf>,

    /// Upper bound on each account directory call in milliseconds
    pub directory_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_route = env::var("WEBHOOK_ROUTE").unwrap_or_else(|_| "/event".to_string());
        if !webhook_route.starts_with('/') {
            return Err(ConfigError::Invalid {
                name: "WEBHOOK_ROUTE",
                value: webhook_route,
                reason: "must start with '/'".to_string(),
            });
        }

        let directory_url = match env::var("DIRECTORY_URL") {
            Ok(raw) if !raw.trim().is_empty() => {
                Some(Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
                    name: "DIRECTORY_URL",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };

        Ok(Config {
            port: parse_var("PORT", 8080),

            webhook_route,

            webhook_secret: load_secret("STRIPE_WEBHOOK_SECRET", "STRIPE_WEBHOOK_SECRET_FILE")?,

            signature_tolerance_secs: parse_var("STRIPE_SIGNATURE_TOLERANCE", 300),

            audit_log_path: env::var("AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("stripe-webhooks.log")),

            directory_url,

            directory_seed_path: env::var("DIRECTORY_SEED_PATH").ok().map(PathBuf::from),

            directory_timeout_ms: parse_var("DIRECTORY_TIMEOUT_MS", 5000),
        })
    }

    pub fn signature_tolerance(&self) -> Duration {
        Duration::from_secs(self.signature_tolerance_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }
}

/// Read the secret from `var`, or from the file named by `file_var`.
fn load_secret(var: &'static str, file_var: &'static str) -> Result<SecretString, ConfigError> {
    let raw = match (env::var(var), env::var(file_var)) {
        (Ok(value), _) => {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptySecret { name: var });
            }
            value
        }
        (Err(_), Ok(path)) => {
            let path = PathBuf::from(path);
            let contents = fs::read_to_string(&path).map_err(|source| ConfigError::SecretFile {
                name: file_var,
                path: path.clone(),
                source,
            })?;
            if contents.trim().is_empty() {
                return Err(ConfigError::EmptySecret { name: file_var });
            }
            contents
        }
        (Err(_), Err(_)) => return Err(ConfigError::MissingSecret(var, file_var)),
    };

    Ok(SecretString::new(raw.trim().to_string()))
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(env_var = name, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
