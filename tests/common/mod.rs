//! Common test utilities for the integration tests
//!
//! Fleet builders, a cache primed from an in-memory fleet, polling helpers
//! and a fleet wrapper that detects overlapping writes to the same unit.

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers")]

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use maintenance_admission_controller::config::ControllerConfig;
use maintenance_admission_controller::constants::{
    MAINTENANCE_IN_PROGRESS_ANNOTATION, NEEDS_MAINTENANCE_ANNOTATION,
};
use maintenance_admission_controller::controller::cache::FleetCache;
use maintenance_admission_controller::fleet::{
    FleetApi, FleetError, FleetWatchStream, InMemoryFleet, WorkerUnit,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Route controller logs to the test harness output
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "maintenance_admission_controller=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A ready unit asking for maintenance
pub fn requesting(name: &str) -> WorkerUnit {
    WorkerUnit::new("default", name).with_annotation(NEEDS_MAINTENANCE_ANNOTATION, "true")
}

/// A unit an agent is currently rebooting
pub fn rebooting(name: &str) -> WorkerUnit {
    WorkerUnit::new("default", name)
        .with_annotation(MAINTENANCE_IN_PROGRESS_ANNOTATION, "true")
        .with_ready(false)
}

/// Bring `cache` up to date with everything `stream` has delivered so far
pub fn drain_into(stream: &mut FleetWatchStream, cache: &FleetCache) {
    while let Some(Some(event)) = stream.next().now_or_never() {
        cache.apply(event.expect("in-memory watch does not fail"));
    }
}

/// A cache holding the current state of `fleet`, plus the watch keeping it fresh
pub fn primed_cache(fleet: &InMemoryFleet) -> (FleetCache, FleetWatchStream) {
    let cache = FleetCache::new();
    let mut stream = fleet.watch();
    drain_into(&mut stream, &cache);
    assert!(cache.synced());
    (cache, stream)
}

/// Controller settings suited to a paused test clock
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        backoff_start_ms: 100,
        backoff_max_ms: 2_000,
        resync_interval_secs: 2,
        cache_sync_timeout_secs: 5,
        log_format: "text".to_string(),
        ..ControllerConfig::default()
    }
}

/// Units in `fleet` currently carrying the approval annotation
pub fn approved_units(fleet: &InMemoryFleet) -> Vec<String> {
    fleet
        .units()
        .into_iter()
        .filter(WorkerUnit::maintenance_approved)
        .map(|unit| unit.key())
        .collect()
}

/// Poll `condition` every 100ms until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .is_ok()
}

/// Finish maintenance on `key` the way the external agent would
pub fn complete_maintenance(fleet: &InMemoryFleet, key: &str) {
    let unit = fleet.get(key).expect("unit exists");
    fleet.insert(WorkerUnit::new(unit.namespace, unit.name));
}

/// Shutdown trigger for `Controller::run`
pub fn shutdown_pair() -> (tokio::sync::oneshot::Sender<()>, impl Future<Output = ()>) {
    let (sender, receiver) = tokio::sync::oneshot::channel::<()>();
    (sender, async move {
        let _ = receiver.await;
    })
}

/// Wraps an [`InMemoryFleet`] and records whether two updates of the same
/// unit were ever in flight at the same time
#[derive(Debug)]
pub struct OverlapDetectingFleet {
    pub inner: Arc<InMemoryFleet>,
    write_delay: Duration,
    in_flight: Mutex<HashMap<String, usize>>,
    pub overlaps: AtomicUsize,
    pub calls: AtomicUsize,
}

impl OverlapDetectingFleet {
    pub fn new(inner: Arc<InMemoryFleet>, write_delay: Duration) -> Self {
        Self {
            inner,
            write_delay,
            in_flight: Mutex::new(HashMap::new()),
            overlaps: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FleetApi for OverlapDetectingFleet {
    fn watch(&self) -> FleetWatchStream {
        self.inner.watch()
    }

    async fn update(&self, unit: &WorkerUnit) -> Result<WorkerUnit, FleetError> {
        let key = unit.key();
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        tokio::time::sleep(self.write_delay).await;
        let result = self.inner.update(unit).await;
        *self.in_flight.lock().unwrap().get_mut(&key).unwrap() -= 1;
        result
    }
}

/// A fleet service whose watch never produces a single event
#[derive(Debug, Default)]
pub struct SilentFleet;

#[async_trait]
impl FleetApi for SilentFleet {
    fn watch(&self) -> FleetWatchStream {
        futures::stream::pending().boxed()
    }

    async fn update(&self, unit: &WorkerUnit) -> Result<WorkerUnit, FleetError> {
        Err(FleetError::NotFound { key: unit.key() })
    }
}
