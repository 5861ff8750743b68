//! # Work Queue
//!
//! De-duplicating, rate-limited FIFO of reconciliation keys.
//!
//! A key moves through three states: *dirty* (waiting in the queue),
//! *processing* (handed out by [`WorkQueue::get`]) and idle. Adding a key that
//! is already dirty is a no-op. Adding a key that is being processed only
//! marks it dirty; it goes back into the queue when [`WorkQueue::done`] is
//! called. A key is therefore never handed to two workers at once, no matter
//! how many workers drain the same queue.

use super::backoff::RateLimiter;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Cloneable handle to a shared work queue
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

struct Inner<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter<K>>,
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> WorkQueue<K> {
    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("WorkQueue")
            .field("pending", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish_non_exhaustive()
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    pub fn new(rate_limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                rate_limiter: Box::new(rate_limiter),
            }),
        }
    }

    /// Queue `key` unless it is already waiting
    ///
    /// Keys currently being processed are re-queued once `done` is called.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "Key in flight, deferring until done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue `key` once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Queue `key` after the backoff the rate limiter assigns to it
    ///
    /// Returns the assigned delay.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = self.inner.rate_limiter.when(&key);
        trace!(?key, ?delay, "Rate limited re-add");
        self.add_after(key, delay);
        delay
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shut down and every queued key has
    /// been handed out. Each returned key must be passed to [`done`](Self::done).
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add or
            // shut_down between the check and the await is not missed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as no longer being processed
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clear the retry history of `key`
    pub fn forget(&self, key: &K) {
        self.inner.rate_limiter.forget(key);
    }

    /// Number of rate-limited re-adds since `key` was last forgotten
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Stop accepting keys and wake every waiting `get`
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys waiting to be handed out (in-flight keys are not counted)
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
