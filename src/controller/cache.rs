//! # Fleet Cache
//!
//! Watch-fed, read-optimized mirror of the fleet.
//!
//! The watch consumer is the only writer: it feeds every [`FleetEvent`] to
//! [`FleetCache::apply`] and pushes the returned keys into the work queue.
//! Everything else (workers, the budget tracker) reads snapshots.
//!
//! A (re)list is buffered between `Init` and `InitDone` and swapped in at
//! once, so readers never observe a half-listed fleet. Units that were cached
//! before a re-list but are missing from it were deleted while the watch was
//! down; they are removed and reported as tombstones.

use crate::fleet::{DeletedUnit, FleetEvent, WorkerUnit};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::debug;

/// Cloneable handle to the shared cache
#[derive(Debug, Clone)]
pub struct FleetCache {
    inner: Arc<CacheInner>,
}

#[derive(Debug)]
struct CacheInner {
    store: RwLock<Store>,
    synced: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct Store {
    units: HashMap<String, Arc<WorkerUnit>>,
    /// Units received since the last `Init`, swapped in at `InitDone`
    relist: Option<HashMap<String, Arc<WorkerUnit>>>,
}

impl Default for FleetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetCache {
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            inner: Arc::new(CacheInner {
                store: RwLock::new(Store::default()),
                synced,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.inner.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.inner.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one watch event into the cache
    ///
    /// Returns the keys whose reconciliation must be (re)triggered. Deleted
    /// units are reported too so a queued key can observe the deletion.
    pub fn apply(&self, event: FleetEvent) -> Vec<String> {
        match event {
            FleetEvent::Init => {
                self.write().relist = Some(HashMap::new());
                Vec::new()
            }
            FleetEvent::InitApply(unit) => {
                let mut store = self.write();
                let key = unit.key();
                match store.relist.as_mut() {
                    Some(relist) => {
                        relist.insert(key, Arc::new(unit));
                        Vec::new()
                    }
                    // Listed unit without a preceding Init: treat as a plain update
                    None => {
                        store.units.insert(key.clone(), Arc::new(unit));
                        vec![key]
                    }
                }
            }
            FleetEvent::InitDone => {
                let keys = self.finish_relist();
                self.inner.synced.send_replace(true);
                keys
            }
            FleetEvent::Apply(unit) => {
                let key = unit.key();
                self.write().units.insert(key.clone(), Arc::new(unit));
                vec![key]
            }
            FleetEvent::Delete(deleted) => {
                let key = deleted.key();
                self.write().units.remove(&key);
                vec![key]
            }
        }
    }

    fn finish_relist(&self) -> Vec<String> {
        let mut store = self.write();
        // InitDone without a preceding Init only marks the cache synced
        let Some(listed) = store.relist.take() else {
            return Vec::new();
        };
        let tombstones: Vec<DeletedUnit> = store
            .units
            .keys()
            .filter(|key| !listed.contains_key(*key))
            .map(|key| DeletedUnit::Tombstone { key: key.clone() })
            .collect();
        for tombstone in &tombstones {
            debug!(unit.key = %tombstone.key(), "Unit vanished while the watch was down");
        }

        let mut keys: Vec<String> = listed.keys().cloned().collect();
        keys.extend(tombstones.iter().map(DeletedUnit::key));
        store.units = listed;
        keys
    }

    /// Cached snapshot of one unit
    pub fn get(&self, key: &str) -> Option<Arc<WorkerUnit>> {
        self.read().units.get(key).cloned()
    }

    /// Snapshot of every cached unit
    pub fn list(&self) -> Vec<Arc<WorkerUnit>> {
        self.read().units.values().cloned().collect()
    }

    /// Every cached unit by key, taken under a single read lock
    pub fn snapshot(&self) -> HashMap<String, Arc<WorkerUnit>> {
        self.read().units.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().units.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the first full list has been received
    pub fn synced(&self) -> bool {
        *self.inner.synced.borrow()
    }

    /// Resolve once the first full list has been received
    pub async fn wait_synced(&self) {
        let mut synced = self.inner.synced.subscribe();
        // The sender lives as long as the cache, so this cannot fail while we hold `self`
        let _ = synced.wait_for(|synced| *synced).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NEEDS_MAINTENANCE_ANNOTATION;

    fn unit(name: &str) -> WorkerUnit {
        WorkerUnit::new("default", name)
    }

    fn list(cache: &FleetCache, units: Vec<WorkerUnit>) -> Vec<String> {
        cache.apply(FleetEvent::Init);
        for unit in units {
            assert!(cache.apply(FleetEvent::InitApply(unit)).is_empty());
        }
        let mut keys = cache.apply(FleetEvent::InitDone);
        keys.sort();
        keys
    }

    #[test]
    fn test_initial_list_marks_synced() {
        let cache = FleetCache::new();
        assert!(!cache.synced());
        let keys = list(&cache, vec![unit("a"), unit("b")]);
        assert!(cache.synced());
        assert_eq!(keys, vec!["default/a", "default/b"]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_relist_is_invisible_until_done() {
        let cache = FleetCache::new();
        list(&cache, vec![unit("a")]);

        cache.apply(FleetEvent::Init);
        cache.apply(FleetEvent::InitApply(unit("b")));
        // Readers still see the previous complete list
        assert!(cache.get("default/a").is_some());
        assert!(cache.get("default/b").is_none());
    }

    #[test]
    fn test_relist_reports_vanished_units() {
        let cache = FleetCache::new();
        list(&cache, vec![unit("a"), unit("b")]);

        let keys = list(&cache, vec![unit("b")]);
        assert_eq!(keys, vec!["default/a", "default/b"]);
        assert!(cache.get("default/a").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_apply_and_delete() {
        let cache = FleetCache::new();
        list(&cache, Vec::new());

        let updated = unit("a").with_annotation(NEEDS_MAINTENANCE_ANNOTATION, "");
        assert_eq!(cache.apply(FleetEvent::Apply(updated)), vec!["default/a"]);
        assert!(cache.get("default/a").unwrap().needs_maintenance());

        let keys = cache.apply(FleetEvent::Delete(DeletedUnit::Tombstone {
            key: "default/a".to_string(),
        }));
        assert_eq!(keys, vec!["default/a"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_of_unknown_unit_still_reports_key() {
        let cache = FleetCache::new();
        let keys = cache.apply(FleetEvent::Delete(DeletedUnit::Final(unit("ghost"))));
        assert_eq!(keys, vec!["default/ghost"]);
    }

    #[test]
    fn test_init_done_without_init_keeps_cached_units() {
        let cache = FleetCache::new();
        cache.apply(FleetEvent::Apply(unit("a")));
        cache.apply(FleetEvent::InitApply(unit("b")));

        assert!(cache.apply(FleetEvent::InitDone).is_empty());
        assert!(cache.synced());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_wait_synced_resolves_after_first_list() {
        let cache = FleetCache::new();
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.wait_synced().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        list(&cache, vec![unit("a")]);
        waiter.await.unwrap();
    }
}
