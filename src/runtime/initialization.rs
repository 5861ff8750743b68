//! # Initialization
//!
//! Process-level setup: rustls crypto provider, tracing subscriber, metrics
//! registration, Kubernetes client construction and shutdown signal handling.

use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Install ring as the rustls crypto provider
///
/// Must run before any TLS connection is made. Installing twice is harmless.
pub fn install_crypto_provider() {
    // Err only means a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Set up the global tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `log_level` applies to this crate and
/// kube is kept at warn. `log_format` selects `json` or human-readable text.
pub fn init_tracing(log_level: &str, log_format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "maintenance_admission_controller={},kube=warn",
            log_level.to_lowercase()
        ))
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("Failed to initialize tracing subscriber: {e}"))
}

/// Build a Kubernetes client
///
/// Uses the kubeconfig at `kubeconfig` when given, otherwise the in-cluster
/// service account or the default kubeconfig.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .context("Failed to create Kubernetes client from the default configuration");
    };

    info!("Using kubeconfig {}", path.display());
    let kubeconfig = kube::config::Kubeconfig::read_from(path)
        .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
    let config = kube::Config::from_custom_kubeconfig(
        kubeconfig,
        &kube::config::KubeConfigOptions::default(),
    )
    .await
    .context("Failed to load kubeconfig")?;
    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
}
