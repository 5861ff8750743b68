//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use maintenance_admission_controller::prelude::*;
//! ```

// Fleet model and the service seam
pub use crate::fleet::{
    DeletedUnit, FleetApi, FleetError, FleetEvent, InMemoryFleet, KubeFleet, UnitKey, WorkerUnit,
};

// Reconciliation pipeline
pub use crate::controller::budget::BudgetTracker;
pub use crate::controller::cache::FleetCache;
pub use crate::controller::queue::WorkQueue;
pub use crate::controller::reconciler::{ReconcileOutcome, Reconciler, ReconcilerError};

// Runtime
pub use crate::runtime::error_policy::RetryDecision;
pub use crate::runtime::{Controller, ControllerError, ControllerPhase};

// Config types
pub use crate::config::{ConfigError, ControllerConfig, ServerConfig};
