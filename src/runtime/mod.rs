//! # Runtime
//!
//! Controller runtime: lifecycle, watch consumption, workers and error policy.
//!
//! - `controller_loop`: phases, startup gate and graceful shutdown
//! - `error_policy`: retry decisions and watch error classification
//! - `initialization`: process setup (TLS, tracing, client, signals)
//! - `watch_loop`: watch consumer and periodic resync
//! - `worker`: queue-draining worker loop

pub mod controller_loop;
pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
pub mod worker;

pub use controller_loop::{Controller, ControllerError, ControllerPhase};
