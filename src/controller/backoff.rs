//! # Rate Limiters
//!
//! Backoff policies used by the work queue when a key is re-added after a
//! failed reconciliation.
//!
//! - [`ExponentialFailureRateLimiter`]: per-key delay that doubles on every
//!   failure, capped at a maximum. Owns the per-key retry count.
//! - [`BucketRateLimiter`]: overall token bucket shared by every key, so a
//!   burst of failures cannot flood the fleet API.
//! - [`MaxOfRateLimiter`]: combines limiters by taking the longest delay.
//!
//! ## Usage
//!
//! ```rust
//! use maintenance_admission_controller::controller::backoff::{
//!     ExponentialFailureRateLimiter, RateLimiter,
//! };
//! use std::time::Duration;
//!
//! let limiter = ExponentialFailureRateLimiter::new(Duration::from_secs(1), Duration::from_secs(30));
//! let key = "default/worker-0".to_string();
//! assert_eq!(limiter.when(&key), Duration::from_secs(1));
//! assert_eq!(limiter.when(&key), Duration::from_secs(2));
//! assert_eq!(limiter.when(&key), Duration::from_secs(4));
//! assert_eq!(limiter.num_requeues(&key), 3);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Decides how long a key waits before it is re-added to the queue
pub trait RateLimiter<K>: Send + Sync + fmt::Debug {
    /// Delay for the next retry of `key`; records the attempt
    fn when(&self, key: &K) -> Duration;
    /// Clear any retry history for `key`
    fn forget(&self, key: &K);
    /// Number of retries recorded for `key` since it was last forgotten
    fn num_requeues(&self, key: &K) -> u32;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug)]
pub struct ExponentialFailureRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ExponentialFailureRateLimiter<K> {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delay after `failures` previous failures
    fn delay_for(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl<K> RateLimiter<K> for ExponentialFailureRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug,
{
    fn when(&self, key: &K) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = self.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    fn forget(&self, key: &K) {
        lock(&self.failures).remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

/// Overall token bucket refilled at `qps` tokens per second, holding at most `burst`
///
/// Every call reserves one token; once the bucket is empty the returned delay
/// is the time until that reservation is covered.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl BucketRateLimiter {
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last_refill = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Applies every inner limiter and waits for the longest of their delays
#[derive(Debug)]
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K: fmt::Debug> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// The limiter used by the controller queue: per-key exponential backoff
/// bounded by an overall token bucket
#[must_use]
pub fn controller_rate_limiter<K>(
    base: Duration,
    max: Duration,
    qps: f64,
    burst: u32,
) -> MaxOfRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ExponentialFailureRateLimiter::new(base, max)),
        Box::new(BucketRateLimiter::new(qps, burst)),
    ])
}
