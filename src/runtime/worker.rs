//! # Worker
//!
//! Queue-draining loop run by every worker task.

use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::Reconciler;
use crate::observability;
use crate::runtime::error_policy::{handle_reconcile_result, RetryDecision};
use std::time::Instant;
use tracing::{debug, Instrument};

/// Process one key from the queue
///
/// Returns `None` once the queue is shut down and drained, otherwise what the
/// retry policy decided for the processed key.
pub async fn process_next_item(
    queue: &WorkQueue<String>,
    reconciler: &Reconciler,
    max_attempts: u32,
) -> Option<RetryDecision> {
    let key = queue.get().await?;
    observability::metrics::set_queue_depth(queue.len());

    // First attempt is 1, the n-th retry is attempt n + 1
    let span = tracing::info_span!(
        "process",
        unit.key = %key,
        attempt = queue.num_requeues(&key) + 1
    );
    let decision = async {
        let start = Instant::now();
        let result = reconciler.reconcile(&key).await;
        observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        handle_reconcile_result(queue, &key, &result, max_attempts)
    }
    .instrument(span)
    .await;
    queue.done(&key);
    Some(decision)
}

/// Drain the queue until it is shut down
pub async fn run_worker(
    id: usize,
    queue: WorkQueue<String>,
    reconciler: std::sync::Arc<Reconciler>,
    max_attempts: u32,
) {
    debug!(worker = id, "Worker started");
    while process_next_item(&queue, &reconciler, max_attempts)
        .await
        .is_some()
    {}
    debug!(worker = id, "Worker stopped");
}
