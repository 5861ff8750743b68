//! # Controller
//!
//! Core controller modules for the maintenance admission controller.
//!
//! - `backoff`: Rate limiters deciding retry delays
//! - `budget`: Admission budget tracking over the cache
//! - `cache`: Watch-fed fleet cache
//! - `queue`: De-duplicating, rate-limited work queue
//! - `reconciler`: Per-key admission decision
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod budget;
pub mod cache;
pub mod queue;
pub mod reconciler;
pub mod server;
