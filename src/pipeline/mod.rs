//! Serialized processing pipeline from classified file events to registry
//! mutations.
//!
//! Classification runs in parallel, but every registry write funnels
//! through this single-concurrency worker: the persisted registry file is
//! the shared resource and the single-writer discipline is its lock.
//! Events are consumed strictly in submission order; a failed item is
//! re-enqueued after a backoff delay without holding up the rest of the
//! queue, and is dropped with a final error once its retry budget is
//! spent.

mod retry;

pub use retry::RetryPolicy;

use crate::registry::{PackageRegistry, RegistryError};
use crate::scanner::{FileEvent, FileStatus};
use std::collections::VecDeque;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Totals for one pipeline pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Events that completed successfully (including no-ops).
    pub processed: usize,
    /// Retry attempts performed.
    pub retried: usize,
    /// Events dropped after exhausting their retry budget or failing
    /// non-retryably.
    pub dropped: usize,
    /// Whether the pass was cut short by cancellation.
    pub cancelled: bool,
}

/// An event waiting in the queue, with its attempt counter.
#[derive(Debug)]
struct Pending {
    event: FileEvent,
    attempt: u32,
}

/// The single-concurrency event worker.
#[derive(Debug, Clone)]
pub struct Pipeline {
    retry: RetryPolicy,
}

impl Pipeline {
    /// Creates a pipeline with the given retry policy.
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Drains `events` into registry mutations.
    ///
    /// Returns when the queue is empty (no pending or delayed items) or
    /// when `token` is cancelled; cancellation aborts pending backoff
    /// timers instead of leaking them into a disposed registry.
    pub async fn run(
        &self,
        events: Vec<FileEvent>,
        registry: &mut PackageRegistry,
        token: &CancellationToken,
    ) -> PipelineReport {
        let mut report = PipelineReport::default();
        let mut queue: VecDeque<Pending> = events
            .into_iter()
            .map(|event| Pending { event, attempt: 0 })
            .collect();
        let mut delayed: Vec<(Instant, Pending)> = Vec::new();

        loop {
            if let Some(item) = queue.pop_front() {
                match dispatch(&item.event, registry) {
                    Ok(()) => report.processed += 1,
                    Err(e) => self.handle_failure(item, e, &mut delayed, &mut report),
                }
                continue;
            }

            if delayed.is_empty() {
                break;
            }

            // Nothing runnable: wait for the earliest backoff deadline,
            // unless torn down first.
            let earliest = delayed
                .iter()
                .map(|(ready_at, _)| *ready_at)
                .min()
                .unwrap_or_else(Instant::now);

            tokio::select! {
                _ = token.cancelled() => {
                    warn!(pending = delayed.len(), "pipeline cancelled with retries pending");
                    report.cancelled = true;
                    return report;
                }
                _ = tokio::time::sleep_until(earliest) => {}
            }

            let now = Instant::now();
            let mut still_waiting = Vec::new();
            for (ready_at, pending) in delayed.drain(..) {
                if ready_at <= now {
                    report.retried += 1;
                    queue.push_back(pending);
                } else {
                    still_waiting.push((ready_at, pending));
                }
            }
            delayed = still_waiting;
        }

        debug!(
            processed = report.processed,
            retried = report.retried,
            dropped = report.dropped,
            "pipeline drained"
        );
        report
    }

    fn handle_failure(
        &self,
        mut item: Pending,
        err: RegistryError,
        delayed: &mut Vec<(Instant, Pending)>,
        report: &mut PipelineReport,
    ) {
        item.attempt += 1;

        if err.is_retryable() && item.attempt < self.retry.max_attempts {
            let delay = self.retry.delay_for(item.attempt);
            warn!(
                filename = %item.event.filename,
                attempt = item.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "processing failed; will retry"
            );
            delayed.push((Instant::now() + delay, item));
        } else {
            error!(
                filename = %item.event.filename,
                attempts = item.attempt,
                error = %err,
                "processing failed permanently; dropping"
            );
            report.dropped += 1;
        }
    }
}

/// Maps one classified event onto a registry operation.
fn dispatch(event: &FileEvent, registry: &mut PackageRegistry) -> Result<(), RegistryError> {
    match event.status {
        FileStatus::Deleted => registry.untrack(&event.filename),
        FileStatus::Added => registry.register(&event.filename),
        FileStatus::Changed => registry.update(&event.filename),
        FileStatus::Unchanged => registry.verify_tracked(&event.filename),
    }
}
