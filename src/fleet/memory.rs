//! # In-Memory Fleet
//!
//! A [`FleetApi`] that keeps the fleet in a map and speaks the same watch
//! protocol as the Kubernetes implementation. Writes are conditional on the
//! resource version exactly like merge patches against the API server.
//!
//! Used by the test suites; also handy for running the controller without a
//! cluster.

use super::{DeletedUnit, FleetApi, FleetError, FleetEvent, FleetWatchStream, WorkerUnit};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

type EventSender = UnboundedSender<Result<FleetEvent, FleetError>>;

#[derive(Debug, Default)]
pub struct InMemoryFleet {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    units: BTreeMap<String, WorkerUnit>,
    next_version: u64,
    watchers: Vec<EventSender>,
    writes: usize,
    failing_updates: usize,
}

impl MemoryState {
    fn bump_version(&mut self, unit: &mut WorkerUnit) {
        self.next_version += 1;
        unit.resource_version = Some(self.next_version.to_string());
    }

    fn broadcast(&mut self, event: &FleetEvent) {
        self.watchers
            .retain(|watcher| watcher.unbounded_send(Ok(event.clone())).is_ok());
    }

    fn list_events(&self) -> Vec<FleetEvent> {
        std::iter::once(FleetEvent::Init)
            .chain(self.units.values().cloned().map(FleetEvent::InitApply))
            .chain(std::iter::once(FleetEvent::InitDone))
            .collect()
    }
}

impl InMemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a unit, notifying watchers; returns the stored copy
    pub fn insert(&self, mut unit: WorkerUnit) -> WorkerUnit {
        let mut state = self.lock();
        state.bump_version(&mut unit);
        state.units.insert(unit.key(), unit.clone());
        state.broadcast(&FleetEvent::Apply(unit.clone()));
        unit
    }

    /// Delete a unit, notifying watchers with its final state
    pub fn remove(&self, key: &str) -> Option<WorkerUnit> {
        let mut state = self.lock();
        let removed = state.units.remove(key)?;
        state.broadcast(&FleetEvent::Delete(DeletedUnit::Final(removed.clone())));
        Some(removed)
    }

    /// Delete a unit without telling watchers, as if the delete event was lost
    pub fn remove_silently(&self, key: &str) -> Option<WorkerUnit> {
        self.lock().units.remove(key)
    }

    /// Make every open watch re-list the fleet
    pub fn relist(&self) {
        let mut state = self.lock();
        let events = state.list_events();
        for event in &events {
            state.broadcast(event);
        }
    }

    pub fn get(&self, key: &str) -> Option<WorkerUnit> {
        self.lock().units.get(key).cloned()
    }

    pub fn units(&self) -> Vec<WorkerUnit> {
        self.lock().units.values().cloned().collect()
    }

    /// Number of successful `update` calls so far
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Make the next `count` updates fail with [`FleetError::Unavailable`]
    pub fn fail_next_updates(&self, count: usize) {
        self.lock().failing_updates = count;
    }
}

#[async_trait]
impl FleetApi for InMemoryFleet {
    fn watch(&self) -> FleetWatchStream {
        let (sender, receiver) = unbounded();
        let mut state = self.lock();
        for event in state.list_events() {
            // Receiver is alive, the send cannot fail here
            let _ = sender.unbounded_send(Ok(event));
        }
        state.watchers.push(sender);
        receiver.boxed()
    }

    async fn update(&self, unit: &WorkerUnit) -> Result<WorkerUnit, FleetError> {
        let mut state = self.lock();
        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return Err(FleetError::Unavailable("injected update failure".to_string()));
        }

        let key = unit.key();
        let current = state
            .units
            .get(&key)
            .cloned()
            .ok_or_else(|| FleetError::NotFound { key: key.clone() })?;
        if unit.resource_version.is_some() && unit.resource_version != current.resource_version {
            return Err(FleetError::Conflict { key });
        }

        // Merge semantics: annotations are added or overwritten, status is untouched
        let mut updated = current;
        updated
            .annotations
            .extend(unit.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        state.bump_version(&mut updated);
        state.units.insert(key, updated.clone());
        state.writes += 1;
        state.broadcast(&FleetEvent::Apply(updated.clone()));
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn drain(stream: &mut FleetWatchStream) -> Vec<FleetEvent> {
        let mut events = Vec::new();
        while let Some(Some(event)) = stream.next().now_or_never() {
            events.push(event.unwrap());
        }
        events
    }

    #[test]
    fn test_watch_starts_with_full_list() {
        let fleet = InMemoryFleet::new();
        fleet.insert(WorkerUnit::new("default", "a"));
        fleet.insert(WorkerUnit::new("default", "b"));

        let mut stream = fleet.watch();
        let events = drain(&mut stream);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], FleetEvent::Init);
        assert!(matches!(events[1], FleetEvent::InitApply(_)));
        assert_eq!(events[3], FleetEvent::InitDone);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let fleet = InMemoryFleet::new();
        let stored = fleet.insert(WorkerUnit::new("default", "a"));

        let first = fleet.update(&stored.approved_copy()).await.unwrap();
        assert!(first.maintenance_approved());

        let err = fleet.update(&stored.approved_copy()).await.unwrap_err();
        assert!(matches!(err, FleetError::Conflict { .. }));
        assert_eq!(fleet.writes(), 1);
    }

    #[tokio::test]
    async fn test_update_of_missing_unit() {
        let fleet = InMemoryFleet::new();
        let err = fleet
            .update(&WorkerUnit::new("default", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let fleet = InMemoryFleet::new();
        let stored = fleet.insert(WorkerUnit::new("default", "a"));
        fleet.fail_next_updates(1);
        assert!(matches!(
            fleet.update(&stored).await,
            Err(FleetError::Unavailable(_))
        ));
        assert!(fleet.update(&stored).await.is_ok());
    }

    #[test]
    fn test_live_events_follow_list() {
        let fleet = InMemoryFleet::new();
        let mut stream = fleet.watch();
        drain(&mut stream);

        fleet.insert(WorkerUnit::new("default", "a"));
        fleet.remove("default/a");
        let events = drain(&mut stream);
        assert!(matches!(events[0], FleetEvent::Apply(_)));
        assert!(matches!(events[1], FleetEvent::Delete(DeletedUnit::Final(_))));
    }
}
