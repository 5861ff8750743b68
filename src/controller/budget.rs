//! # Admission Budget
//!
//! Counts the units that are currently unavailable, against the cache
//! snapshot rather than the live fleet service.
//!
//! The cache lags behind our own writes: an approval becomes visible only once
//! the watch delivers it. Until then the tracker keeps the approval in a small
//! ledger and counts it as unavailable, so back-to-back reconciliations do not
//! admit more units than the budget allows just because the watch is slow.
//! A ledger entry is retired as soon as the cache holds a different version of
//! the unit (our write, or anything newer) or the unit is gone.

use super::cache::FleetCache;
use crate::fleet::WorkerUnit;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct BudgetTracker {
    cache: FleetCache,
    /// Approved keys mapped to the resource version the approval was based on
    unobserved: Arc<Mutex<HashMap<String, Option<String>>>>,
}

impl BudgetTracker {
    pub fn new(cache: FleetCache) -> Self {
        Self {
            cache,
            unobserved: Arc::default(),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, HashMap<String, Option<String>>> {
        self.unobserved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of units that count against the admission budget right now
    pub fn unavailable_count(&self) -> usize {
        // Both terms come from the same snapshot, otherwise a unit whose
        // approval lands in between is counted by neither
        let units = self.cache.snapshot();
        let cached = units.values().filter(|unit| unit.is_unavailable()).count();

        let mut ledger = self.ledger();
        ledger.retain(|key, based_on| match units.get(key) {
            Some(unit) => !unit.is_unavailable() && unit.resource_version == *based_on,
            None => false,
        });
        trace!(cached, unobserved = ledger.len(), "Counted unavailable units");
        cached + ledger.len()
    }

    /// Remember an approval written from the snapshot `unit`
    pub fn record_admission(&self, unit: &WorkerUnit) {
        self.ledger()
            .insert(unit.key(), unit.resource_version.clone());
    }

    /// Approvals written but not yet seen through the cache
    pub fn unobserved_admissions(&self) -> usize {
        self.ledger().len()
    }
}
