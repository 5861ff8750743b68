//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Annotation set by an external agent (or operator) when a unit wants to be disrupted.
pub const NEEDS_MAINTENANCE_ANNOTATION: &str = "needs-maintenance";

/// Annotation written by this controller once a unit is admitted into maintenance.
pub const MAINTENANCE_APPROVED_ANNOTATION: &str = "maintenance-approved";

/// Annotation set by the external execution agent once the disruptive operation started.
pub const MAINTENANCE_IN_PROGRESS_ANNOTATION: &str = "maintenance-in-progress";

/// Value written alongside the approval annotation.
pub const MAINTENANCE_APPROVED_VALUE: &str = "true";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default maximum number of simultaneously unavailable units
pub const DEFAULT_MAX_UNAVAILABLE: usize = 1;

/// Default interval at which every cached key is re-queued (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 10;

/// Default number of queue workers
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Default retry ceiling for a failing key
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default fleet partition (namespace) to watch
pub const DEFAULT_WATCH_NAMESPACE: &str = "default";

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default overall queue admission rate (keys per second)
pub const DEFAULT_QUEUE_QPS: f64 = 10.0;

/// Default overall queue burst size
pub const DEFAULT_QUEUE_BURST: u32 = 100;

/// Default time allowed for the initial cache sync before startup is aborted (seconds)
pub const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 60;

