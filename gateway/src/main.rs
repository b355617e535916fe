//! Membergate - Stripe webhook receiver that activates paid members.
//!
//! This binary:
//! - Verifies the `Stripe-Signature` of each inbound event
//! - Approves the account matching the payment's billing email
//! - Appends one audit line per request
//!
//! Accounts live in an external directory (REST) or, for local runs, an
//! in-memory directory seeded from a JSON file.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use membergate::directory::AccountDirectory;
use membergate::web::{self, SignatureVerifier};
use membergate::{
    ActivationService, AppState, AuditLog, Config, FileSink, HttpDirectory, MemoryDirectory,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("gateway_starting");

    // Load configuration
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        webhook_route = %config.webhook_route,
        signature_tolerance_secs = config.signature_tolerance_secs,
        audit_log_path = %config.audit_log_path.display(),
        directory_url = ?config.directory_url.as_ref().map(|u| u.as_str()),
        directory_seed_path = ?config.directory_seed_path,
        directory_timeout_ms = config.directory_timeout_ms,
        "config_loaded"
    );

    let directory = build_directory(&config)?;

    let sink = FileSink::open(&config.audit_log_path).with_context(|| {
        format!(
            "Failed to open audit log {}",
            config.audit_log_path.display()
        )
    })?;
    let (audit, audit_writer) = AuditLog::spawn(sink);

    let verifier = SignatureVerifier::new(
        config.webhook_secret.clone(),
        config.signature_tolerance(),
    );
    let activation =
        ActivationService::new(verifier, directory, audit, config.directory_timeout());

    let port = config.port;
    let app = web::router(AppState::new(config, activation));

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "gateway_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // The router (and every AuditLog clone) is gone; drain pending audit lines
    audit_writer.finish().await;

    info!("gateway_shutdown_complete");

    Ok(())
}

/// Pick the account directory adapter from configuration.
fn build_directory(config: &Config) -> Result<Arc<dyn AccountDirectory>> {
    if let Some(url) = &config.directory_url {
        let directory = HttpDirectory::new(url.clone(), config.directory_timeout())
            .context("Failed to create HTTP directory client")?;
        return Ok(Arc::new(directory));
    }

    if let Some(path) = &config.directory_seed_path {
        return Ok(Arc::new(MemoryDirectory::from_seed_file(path)?));
    }

    warn!("directory_not_configured_using_empty_memory_directory");
    Ok(Arc::new(MemoryDirectory::new()))
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("gateway_shutting_down");
}
