//! # Maintenance Admission Controller
//!
//! Binary entry point: reads configuration, sets up logging, metrics and the
//! probe server, connects to Kubernetes and runs the controller until SIGINT
//! or SIGTERM. Any startup failure, including a cache that never syncs,
//! terminates the process with a non-zero exit code.

use anyhow::{Context, Result};
use clap::Parser;
use maintenance_admission_controller::cli::Args;
use maintenance_admission_controller::config::{ControllerConfig, ServerConfig};
use maintenance_admission_controller::controller::server::{start_server, ServerState};
use maintenance_admission_controller::fleet::{FleetApi, KubeFleet};
use maintenance_admission_controller::observability;
use maintenance_admission_controller::runtime::{initialization, Controller};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Controller terminated: {:#}", e);
        eprintln!("maintenance-admission-controller: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let mut config = ControllerConfig::from_env();
    args.apply_to(&mut config);
    let server_config = ServerConfig::from_env();

    initialization::install_crypto_provider();
    initialization::init_tracing(&config.log_level, &config.log_format)?;
    info!("Starting maintenance admission controller v{}", env!("CARGO_PKG_VERSION"));

    config.validate().context("Invalid controller configuration")?;
    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let client = initialization::create_client(args.kubeconfig.as_deref()).await?;
    let fleet: Arc<dyn FleetApi> = Arc::new(KubeFleet::new(client, config.watch_namespace.clone()));
    let controller = Controller::new(fleet, config)?;

    let server_state = Arc::new(ServerState {
        phase: controller.subscribe(),
    });
    let server = tokio::spawn(async move {
        if let Err(e) = start_server(server_config.metrics_port, server_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let result = controller.run(initialization::shutdown_signal()).await;
    server.abort();
    result.context("Controller failed")
}
