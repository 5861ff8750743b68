//! # Reconciler
//!
//! Per-key admission decision.
//!
//! For a dequeued key the reconciler reads the unit from the cache and walks
//! this decision order:
//!
//! 1. key does not parse: non-retryable error
//! 2. unit not cached: it was deleted, nothing to do
//! 3. `maintenance-in-progress` present: the agent is already at work
//! 4. `maintenance-approved` present: already admitted, no second write
//! 5. `needs-maintenance` absent: nothing requested
//! 6. unavailable units >= budget: retryable error, the queue polls with backoff
//! 7. write an approved copy of the unit, conditional on the version it was read at
//!
//! The cached unit is never modified in place.

use super::budget::BudgetTracker;
use super::cache::FleetCache;
use crate::fleet::{FleetApi, FleetError, KeyError, UnitKey};
use crate::observability;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, Instrument};

/// What a successful reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The unit is no longer in the fleet
    UnitGone,
    /// The unit did not ask for maintenance
    NoMaintenanceRequested,
    /// The unit already carries the approval
    AlreadyApproved,
    /// Maintenance is already running on the unit
    MaintenanceInProgress,
    /// The approval annotation was written
    Approved,
}

impl ReconcileOutcome {
    /// Label used in logs and metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::UnitGone => "unit-gone",
            ReconcileOutcome::NoMaintenanceRequested => "no-maintenance-requested",
            ReconcileOutcome::AlreadyApproved => "already-approved",
            ReconcileOutcome::MaintenanceInProgress => "maintenance-in-progress",
            ReconcileOutcome::Approved => "approved",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Retrying cannot fix a key that names no unit
    #[error(transparent)]
    MalformedKey(#[from] KeyError),
    #[error("admission budget exhausted: {unavailable} unavailable, at most {max} allowed")]
    BudgetExhausted { unavailable: usize, max: usize },
    #[error("fleet update failed: {0}")]
    Fleet(#[from] FleetError),
}

impl ReconcilerError {
    /// Whether the key should be re-queued with backoff
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcilerError::MalformedKey(_))
    }

    /// Label used in logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcilerError::MalformedKey(_) => "malformed-key",
            ReconcilerError::BudgetExhausted { .. } => "budget-exhausted",
            ReconcilerError::Fleet(FleetError::Conflict { .. }) => "conflict",
            ReconcilerError::Fleet(FleetError::NotFound { .. }) => "not-found",
            ReconcilerError::Fleet(_) => "fleet",
        }
    }
}

/// Shared reconciliation context, one per controller
pub struct Reconciler {
    cache: FleetCache,
    budget: BudgetTracker,
    fleet: Arc<dyn FleetApi>,
    max_unavailable: usize,
    /// Held across the budget check and the write when strict admission is on
    admission_lock: Option<Mutex<()>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("fleet", &self.fleet)
            .field("max_unavailable", &self.max_unavailable)
            .field("strict_admission", &self.admission_lock.is_some())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(cache: FleetCache, fleet: Arc<dyn FleetApi>, max_unavailable: usize) -> Self {
        Self {
            budget: BudgetTracker::new(cache.clone()),
            cache,
            fleet,
            max_unavailable,
            admission_lock: None,
        }
    }

    /// Serialize admissions so concurrent workers cannot overshoot the budget
    #[must_use]
    pub fn with_strict_admission(mut self, strict: bool) -> Self {
        self.admission_lock = strict.then(|| Mutex::new(()));
        self
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn cache(&self) -> &FleetCache {
        &self.cache
    }

    /// Reconcile one key
    ///
    /// # Errors
    ///
    /// [`ReconcilerError::MalformedKey`] is final; every other error asks for a
    /// retry with backoff.
    pub async fn reconcile(&self, key: &str) -> Result<ReconcileOutcome, ReconcilerError> {
        let span = tracing::info_span!("reconcile", unit.key = key);
        self.reconcile_internal(key).instrument(span).await
    }

    async fn reconcile_internal(&self, key: &str) -> Result<ReconcileOutcome, ReconcilerError> {
        let unit_key = UnitKey::parse(key)?;

        let Some(unit) = self.cache.get(&unit_key.to_string()) else {
            debug!("Unit no longer exists, nothing to do");
            return Ok(ReconcileOutcome::UnitGone);
        };
        if unit.maintenance_in_progress() {
            debug!("Maintenance in progress");
            return Ok(ReconcileOutcome::MaintenanceInProgress);
        }
        if unit.maintenance_approved() {
            debug!("Maintenance already approved");
            return Ok(ReconcileOutcome::AlreadyApproved);
        }
        if !unit.needs_maintenance() {
            debug!("No maintenance requested");
            return Ok(ReconcileOutcome::NoMaintenanceRequested);
        }

        let _admission = match &self.admission_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let unavailable = self.budget.unavailable_count();
        observability::metrics::set_unavailable_units(unavailable);
        if unavailable >= self.max_unavailable {
            return Err(ReconcilerError::BudgetExhausted {
                unavailable,
                max: self.max_unavailable,
            });
        }

        self.fleet.update(&unit.approved_copy()).await?;
        self.budget.record_admission(&unit);
        observability::metrics::increment_approvals();
        info!(
            unavailable,
            max_unavailable = self.max_unavailable,
            "Approved maintenance for {}",
            unit_key
        );
        Ok(ReconcileOutcome::Approved)
    }
}
