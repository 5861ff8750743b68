//! # Watch Loop
//!
//! The single writer of the fleet cache. Consumes the fleet watch stream,
//! folds each event into the cache and pushes the affected keys into the
//! work queue. A separate resync loop re-pushes every cached key on a fixed
//! interval so missed events still converge.

use crate::controller::cache::FleetCache;
use crate::controller::queue::WorkQueue;
use crate::fleet::FleetApi;
use crate::observability;
use crate::runtime::error_policy::handle_watch_error;
use crate::runtime::ControllerPhase;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Resolve once the controller starts shutting down
pub(crate) async fn stopping(phase: &mut watch::Receiver<ControllerPhase>) {
    // A dropped sender means the controller is gone, which is also a stop
    let _ = phase.wait_for(ControllerPhase::is_shutting_down).await;
}

/// Run the watch consumer until shutdown
///
/// Errors reported by the stream are classified and logged; the stream retries
/// on its own. If the stream ends it is reopened after `restart_delay`.
pub async fn run_watch_loop(
    fleet: Arc<dyn FleetApi>,
    cache: FleetCache,
    queue: WorkQueue<String>,
    mut phase: watch::Receiver<ControllerPhase>,
    restart_delay: Duration,
) {
    info!("Starting fleet watch...");
    let mut stream = fleet.watch();
    loop {
        tokio::select! {
            () = stopping(&mut phase) => break,
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    for key in cache.apply(event) {
                        queue.add(key);
                    }
                    observability::metrics::set_queue_depth(queue.len());
                }
                Some(Err(error)) => {
                    handle_watch_error(&error);
                }
                None => {
                    warn!("Fleet watch ended, reopening in {:?}", restart_delay);
                    tokio::select! {
                        () = stopping(&mut phase) => break,
                        () = tokio::time::sleep(restart_delay) => {}
                    }
                    stream = fleet.watch();
                }
            },
        }
    }
    info!("Fleet watch stopped");
}

/// Re-queue every cached key each `interval` until shutdown
pub async fn run_resync_loop(
    cache: FleetCache,
    queue: WorkQueue<String>,
    mut phase: watch::Receiver<ControllerPhase>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; the initial list already queued everything
    ticker.tick().await;

    loop {
        tokio::select! {
            () = stopping(&mut phase) => break,
            _ = ticker.tick() => {
                let keys = cache.keys();
                debug!(count = keys.len(), "Resync");
                for key in keys {
                    queue.add(key);
                }
                observability::metrics::set_queue_depth(queue.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backoff::ExponentialFailureRateLimiter;
    use crate::fleet::{InMemoryFleet, WorkerUnit};

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(ExponentialFailureRateLimiter::new(
            Duration::from_millis(1),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_feeds_cache_and_queue() {
        let fleet = Arc::new(InMemoryFleet::new());
        fleet.insert(WorkerUnit::new("default", "a"));
        let cache = FleetCache::new();
        let queue = queue();
        let (phase, receiver) = watch::channel(ControllerPhase::Running);

        let task = tokio::spawn(run_watch_loop(
            Arc::clone(&fleet) as Arc<dyn FleetApi>,
            cache.clone(),
            queue.clone(),
            receiver,
            Duration::from_secs(1),
        ));
        cache.wait_synced().await;
        assert_eq!(queue.len(), 1);

        fleet.insert(WorkerUnit::new("default", "b"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get("default/b").is_some());
        assert_eq!(queue.len(), 2);

        phase.send_replace(ControllerPhase::Stopping);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_requeues_every_key() {
        let cache = FleetCache::new();
        cache.apply(crate::fleet::FleetEvent::Apply(WorkerUnit::new("default", "a")));
        let queue = queue();
        let (phase, receiver) = watch::channel(ControllerPhase::Running);

        let task = tokio::spawn(run_resync_loop(
            cache.clone(),
            queue.clone(),
            receiver,
            Duration::from_secs(10),
        ));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len(), 1);

        phase.send_replace(ControllerPhase::Stopped);
        task.await.unwrap();
    }
}
