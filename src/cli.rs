//! # Command Line
//!
//! Flags accepted by the controller binary. Every flag overrides the matching
//! environment variable read by [`ControllerConfig::from_env`].
//!
//! ```bash
//! maintenance-admission-controller --kubeconfig ~/.kube/config --namespace fleet --workers 2
//! ```

use crate::config::ControllerConfig;
use clap::Parser;
use std::path::PathBuf;

/// Admits fleet units into disruptive maintenance under an unavailability budget
#[derive(Parser, Debug, Default)]
#[command(name = "maintenance-admission-controller", version, long_about = None)]
pub struct Args {
    /// Path to a kubeconfig file; in-cluster or default configuration when omitted
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace holding the fleet ("" watches all namespaces) [env: WATCH_NAMESPACE]
    #[arg(long)]
    pub namespace: Option<String>,

    /// Number of concurrent workers [env: WORKER_COUNT]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Maximum number of simultaneously unavailable units [env: MAX_UNAVAILABLE]
    #[arg(long)]
    pub max_unavailable: Option<usize>,
}

impl Args {
    /// Overlay the flags that were given onto `config`
    pub fn apply_to(&self, config: &mut ControllerConfig) {
        if let Some(namespace) = &self.namespace {
            config.watch_namespace.clone_from(namespace);
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(max_unavailable) = self.max_unavailable {
            config.max_unavailable = max_unavailable;
        }
    }
}
