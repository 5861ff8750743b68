//! # Controller Loop
//!
//! Lifecycle and concurrency orchestration.
//!
//! ```text
//! Created -> Starting -> Running -> Stopping -> Stopped
//! ```
//!
//! `Starting` runs the watch consumer and resync loop and blocks until the
//! cache has seen a full list of the fleet (bounded by the cache sync
//! timeout). `Running` drains the queue with the configured number of workers.
//! On shutdown the queue is closed, workers finish the keys they already hold
//! plus anything still queued, background tasks stop, and the controller ends
//! in `Stopped`.

use crate::config::{ConfigError, ControllerConfig};
use crate::controller::backoff::controller_rate_limiter;
use crate::controller::cache::FleetCache;
use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::Reconciler;
use crate::fleet::FleetApi;
use crate::runtime::watch_loop::{run_resync_loop, run_watch_loop};
use crate::runtime::worker::run_worker;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Lifecycle phase, ordered from creation to termination
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ControllerPhase {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ControllerPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerPhase::Created => "Created",
            ControllerPhase::Starting => "Starting",
            ControllerPhase::Running => "Running",
            ControllerPhase::Stopping => "Stopping",
            ControllerPhase::Stopped => "Stopped",
        }
    }

    /// Whether background tasks should wind down
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self >= ControllerPhase::Stopping
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("fleet cache did not sync within {0:?}")]
    CacheSyncTimeout(Duration),
    #[error("controller can only be run once (currently {})", .0.as_str())]
    AlreadyStarted(ControllerPhase),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("controller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub struct Controller {
    config: ControllerConfig,
    fleet: Arc<dyn FleetApi>,
    cache: FleetCache,
    queue: WorkQueue<String>,
    reconciler: Arc<Reconciler>,
    phase: watch::Sender<ControllerPhase>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("phase", &self.phase())
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Build a controller for `fleet`
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    pub fn new(fleet: Arc<dyn FleetApi>, config: ControllerConfig) -> Result<Self, ControllerError> {
        config.validate()?;

        let cache = FleetCache::new();
        let queue = WorkQueue::new(controller_rate_limiter(
            config.backoff_start_duration(),
            config.backoff_max_duration(),
            config.queue_qps,
            config.queue_burst,
        ));
        let reconciler = Reconciler::new(cache.clone(), Arc::clone(&fleet), config.max_unavailable)
            .with_strict_admission(config.strict_admission);
        let (phase, _) = watch::channel(ControllerPhase::Created);

        Ok(Self {
            config,
            fleet,
            cache,
            queue,
            reconciler: Arc::new(reconciler),
            phase,
        })
    }

    pub fn phase(&self) -> ControllerPhase {
        *self.phase.borrow()
    }

    /// Follow phase changes (used by the readiness probe)
    pub fn subscribe(&self) -> watch::Receiver<ControllerPhase> {
        self.phase.subscribe()
    }

    pub fn cache(&self) -> &FleetCache {
        &self.cache
    }

    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn set_phase(&self, phase: ControllerPhase) {
        info!(phase = phase.as_str(), "Controller phase changed");
        self.phase.send_replace(phase);
    }

    /// Run until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// [`ControllerError::CacheSyncTimeout`] if the fleet cannot be listed in
    /// time; callers should treat it as fatal.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), ControllerError> {
        let claimed = self.phase.send_if_modified(|phase| {
            if *phase == ControllerPhase::Created {
                *phase = ControllerPhase::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ControllerError::AlreadyStarted(self.phase()));
        }
        info!(
            namespace = %self.config.watch_namespace,
            workers = self.config.worker_count,
            max_unavailable = self.config.max_unavailable,
            strict_admission = self.config.strict_admission,
            "🚀 Starting maintenance admission controller"
        );

        let mut background = JoinSet::new();
        background.spawn(run_watch_loop(
            Arc::clone(&self.fleet),
            self.cache.clone(),
            self.queue.clone(),
            self.phase.subscribe(),
            self.config.backoff_start_duration(),
        ));
        background.spawn(run_resync_loop(
            self.cache.clone(),
            self.queue.clone(),
            self.phase.subscribe(),
            self.config.resync_interval(),
        ));

        tokio::pin!(shutdown);
        let timeout = self.config.cache_sync_timeout();
        let synced = tokio::select! {
            synced = tokio::time::timeout(timeout, self.cache.wait_synced()) => synced.is_ok(),
            () = &mut shutdown => {
                info!("Shutdown requested before the fleet cache synced");
                self.stop(&mut background, &mut JoinSet::new()).await?;
                return Ok(());
            }
        };
        if !synced {
            error!(timeout = ?timeout, "Timed out waiting for the fleet cache to sync");
            self.stop(&mut background, &mut JoinSet::new()).await?;
            return Err(ControllerError::CacheSyncTimeout(timeout));
        }
        info!(units = self.cache.len(), "Fleet cache synced");

        let mut workers = JoinSet::new();
        for id in 0..self.config.worker_count {
            workers.spawn(run_worker(
                id,
                self.queue.clone(),
                Arc::clone(&self.reconciler),
                self.config.max_retry_attempts,
            ));
        }
        self.set_phase(ControllerPhase::Running);

        shutdown.await;
        info!("Received shutdown signal, waiting for in-flight reconciliations to complete...");
        self.stop(&mut background, &mut workers).await
    }

    async fn stop(
        &self,
        background: &mut JoinSet<()>,
        workers: &mut JoinSet<()>,
    ) -> Result<(), ControllerError> {
        self.set_phase(ControllerPhase::Stopping);
        self.queue.shut_down();

        let mut first_failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
                first_failure.get_or_insert(e);
            }
        }
        while let Some(joined) = background.join_next().await {
            if let Err(e) = joined {
                error!("Background task failed: {}", e);
                first_failure.get_or_insert(e);
            }
        }

        self.set_phase(ControllerPhase::Stopped);
        info!("Controller stopped");
        first_failure.map_or(Ok(()), |e| Err(ControllerError::Task(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(ControllerPhase::Created < ControllerPhase::Starting);
        assert!(!ControllerPhase::Running.is_shutting_down());
        assert!(ControllerPhase::Stopping.is_shutting_down());
        assert!(ControllerPhase::Stopped.is_shutting_down());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ControllerConfig {
            worker_count: 0,
            ..ControllerConfig::default()
        };
        let fleet = Arc::new(crate::fleet::InMemoryFleet::new());
        assert!(matches!(
            Controller::new(fleet, config),
            Err(ControllerError::Config(_))
        ));
    }
}
