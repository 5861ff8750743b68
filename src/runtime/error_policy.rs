//! # Error Policy
//!
//! Retry decisions after a reconciliation, and classification of watch stream
//! errors.

use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::{ReconcileOutcome, ReconcilerError};
use crate::fleet::FleetError;
use crate::observability;
use tracing::{debug, error, info, warn};

/// What the retry policy did with a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reconciled successfully, retry history cleared
    Forgotten,
    /// Re-queued with backoff; `attempt` is the retry number, starting at 1
    Requeued { attempt: u32 },
    /// Abandoned until an external event or resync brings the key back
    Dropped,
}

/// Apply the retry policy to the result of reconciling `key`
///
/// - success: forget the key's retry history
/// - retryable failure below `max_attempts` retries: re-add with backoff
/// - retryable failure at the ceiling, or non-retryable failure: forget and drop
pub fn handle_reconcile_result(
    queue: &WorkQueue<String>,
    key: &str,
    result: &Result<ReconcileOutcome, ReconcilerError>,
    max_attempts: u32,
) -> RetryDecision {
    let key = key.to_string();
    let error = match result {
        Ok(outcome) => {
            debug!(unit.key = %key, outcome = outcome.as_str(), "Reconciled");
            observability::metrics::increment_reconciliations(outcome.as_str());
            queue.forget(&key);
            return RetryDecision::Forgotten;
        }
        Err(error) => error,
    };
    observability::metrics::increment_reconciliation_errors(error.kind());

    if !error.is_retryable() {
        error!(unit.key = %key, error = %error, "Dropping key, error is not retryable");
        queue.forget(&key);
        observability::metrics::increment_dropped_keys("non_retryable");
        return RetryDecision::Dropped;
    }

    let retries = queue.num_requeues(&key);
    if retries < max_attempts {
        let attempt = retries + 1;
        let delay = queue.add_rate_limited(key.clone());
        let next_retry = chrono::TimeDelta::from_std(delay)
            .ok()
            .and_then(|delay| chrono::Utc::now().checked_add_signed(delay))
            .map(|at| at.to_rfc3339());
        info!(
            unit.key = %key,
            attempt,
            max_attempts,
            error_kind = error.kind(),
            next_retry = next_retry.as_deref().unwrap_or("unknown"),
            "Error reconciling {}: {}, retrying in {:?}",
            key,
            error,
            delay
        );
        observability::metrics::increment_requeues();
        RetryDecision::Requeued { attempt }
    } else {
        error!(
            unit.key = %key,
            attempts = retries + 1,
            error = %error,
            "Dropping key out of the queue after {} retries",
            retries
        );
        queue.forget(&key);
        observability::metrics::increment_dropped_keys("exhausted");
        RetryDecision::Dropped
    }
}

/// Broad class of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 410: the resource version we resumed from is gone, a re-list follows
    ResourceVersionExpired,
    /// 401/403: credentials or RBAC no longer allow watching the fleet
    Unauthorized,
    /// 429: the API server asked us to slow down
    Throttled,
    /// 404: the watched collection does not exist
    NotFound,
    Other,
}

/// Classify a watch error by its message
///
/// The watcher flattens API errors into strings, so matching on status codes
/// and reasons in the text is the only handle available.
pub fn classify_watch_error(error: &FleetError) -> WatchErrorKind {
    let message = error.to_string();
    // 404 first: a plain-text 404 body shows up inside other error chains
    let is_not_found = message.contains("404") || message.contains("NotFound");
    if is_not_found {
        WatchErrorKind::NotFound
    } else if message.contains("410")
        || message.contains("too old resource version")
        || message.contains("Expired")
        || message.contains("Gone")
    {
        WatchErrorKind::ResourceVersionExpired
    } else if message.contains("401")
        || message.contains("403")
        || message.contains("Unauthorized")
        || message.contains("Forbidden")
    {
        WatchErrorKind::Unauthorized
    } else if message.contains("429") || message.contains("TooManyRequests") {
        WatchErrorKind::Throttled
    } else {
        WatchErrorKind::Other
    }
}

/// Log a watch stream error; the stream itself keeps retrying
pub fn handle_watch_error(error: &FleetError) -> WatchErrorKind {
    let kind = classify_watch_error(error);
    match kind {
        WatchErrorKind::ResourceVersionExpired => {
            warn!(error = %error, "Watch resource version expired (410), fleet will be re-listed");
        }
        WatchErrorKind::Unauthorized => {
            error!(
                error = %error,
                "❌ Watch not authorized - check the service account can list and watch pods"
            );
        }
        WatchErrorKind::Throttled => {
            warn!(error = %error, "API server throttling the watch (429), backing off");
        }
        WatchErrorKind::NotFound => {
            warn!(error = %error, "Watched collection not found (404)");
        }
        WatchErrorKind::Other => {
            error!(error = %error, "Fleet watch error");
        }
    }
    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backoff::ExponentialFailureRateLimiter;
    use crate::fleet::KeyError;
    use std::time::Duration;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(ExponentialFailureRateLimiter::new(
            Duration::from_millis(1),
            Duration::from_millis(100),
        ))
    }

    fn budget_error() -> Result<ReconcileOutcome, ReconcilerError> {
        Err(ReconcilerError::BudgetExhausted {
            unavailable: 1,
            max: 1,
        })
    }

    #[tokio::test]
    async fn test_success_forgets_history() {
        let queue = queue();
        let key = "default/a";
        handle_reconcile_result(&queue, key, &budget_error(), 5);
        assert_eq!(queue.num_requeues(&key.to_string()), 1);

        let decision = handle_reconcile_result(&queue, key, &Ok(ReconcileOutcome::Approved), 5);
        assert_eq!(decision, RetryDecision::Forgotten);
        assert_eq!(queue.num_requeues(&key.to_string()), 0);
    }

    #[tokio::test]
    async fn test_retries_until_ceiling_then_drops() {
        let queue = queue();
        let key = "default/a";
        for expected in 1..=3 {
            assert_eq!(
                handle_reconcile_result(&queue, key, &budget_error(), 3),
                RetryDecision::Requeued { attempt: expected }
            );
        }
        assert_eq!(
            handle_reconcile_result(&queue, key, &budget_error(), 3),
            RetryDecision::Dropped
        );
        assert_eq!(queue.num_requeues(&key.to_string()), 0);
    }

    #[tokio::test]
    async fn test_malformed_key_dropped_without_retry() {
        let queue = queue();
        let key = "not-a-valid-key";
        let result = Err(ReconcilerError::MalformedKey(KeyError {
            key: key.to_string(),
        }));
        assert_eq!(
            handle_reconcile_result(&queue, key, &result, 5),
            RetryDecision::Dropped
        );
        assert_eq!(queue.num_requeues(&key.to_string()), 0);
    }

    #[test]
    fn test_watch_error_classification() {
        let cases = [
            ("410: too old resource version", WatchErrorKind::ResourceVersionExpired),
            ("ApiError: Unauthorized (401)", WatchErrorKind::Unauthorized),
            ("pods is forbidden: Forbidden (403)", WatchErrorKind::Unauthorized),
            ("429 TooManyRequests", WatchErrorKind::Throttled),
            ("404 page not found", WatchErrorKind::NotFound),
            ("connection reset by peer", WatchErrorKind::Other),
        ];
        for (message, expected) in cases {
            let error = FleetError::Watch(message.to_string());
            assert_eq!(classify_watch_error(&error), expected, "{message}");
        }
    }
}
