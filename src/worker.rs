//! Background polling loops.
//!
//! The outbox processor, the scheduler and the inbox sweeper all follow the
//! same shape: on every interval, claim a bounded batch from the store and
//! work through it. [`WorkerHandle::spawn`] runs any [`PollingTask`] on its
//! own tokio task until it is stopped.
//!
//! ## Example
//!
//! ```ignore
//! let processor = OutboxProcessor::new(store, dispatcher, OutboxConfig::default())?;
//! let worker = WorkerHandle::spawn(processor, Duration::from_millis(50));
//!
//! // ... do work ...
//!
//! let stats = worker.stop().await;
//! println!("Published {} messages", stats.completed);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Result of draining one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    /// Items claimed from the store.
    pub claimed: usize,
    /// Items whose dispatch succeeded and was recorded.
    pub completed: usize,
    /// Items that failed and were scheduled for another attempt.
    pub retried: usize,
    /// Items that failed and exhausted their retry budget.
    pub dead_lettered: usize,
    /// Claimed items handed back untouched because the tick was cancelled.
    pub released: usize,
    /// Outcomes that could not be written back to the store.
    pub store_errors: usize,
}

impl DrainResult {
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }

    pub(crate) fn record(&mut self, outcome: &Result<ItemOutcome, StoreError>) {
        match outcome {
            Ok(ItemOutcome::Completed) | Ok(ItemOutcome::Rescheduled { .. }) => self.completed += 1,
            Ok(ItemOutcome::Retrying { .. }) => self.retried += 1,
            Ok(ItemOutcome::DeadLettered { .. }) | Ok(ItemOutcome::Skipped { .. }) => {
                self.dead_lettered += 1
            }
            Err(_) => self.store_errors += 1,
        }
    }
}

/// What happened to a single claimed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Dispatched and marked processed.
    Completed,
    /// Recurring item dispatched and moved to its next occurrence.
    Rescheduled { next_at: DateTime<Utc> },
    /// Dispatch failed; another attempt is due at `next_retry_at`.
    Retrying {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Dispatch failed and the retry budget is spent.
    DeadLettered { retry_count: u32 },
    /// Recurring item exhausted its retries for this occurrence and moved on.
    Skipped { next_at: DateTime<Utc> },
}

/// Cumulative statistics of a background worker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: usize,
    pub aborted_polls: usize,
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub released: usize,
    pub store_errors: usize,
}

impl WorkerStats {
    fn record(&mut self, result: &DrainResult) {
        self.claimed += result.claimed;
        self.completed += result.completed;
        self.retried += result.retried;
        self.dead_lettered += result.dead_lettered;
        self.released += result.released;
        self.store_errors += result.store_errors;
    }
}

/// One unit of periodic work.
///
/// An `Err` means the batch could not be claimed at all (store unavailable).
/// The loop logs it and tries again on the next interval.
#[async_trait]
pub trait PollingTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run_once(&self, cancel: &CancellationToken) -> Result<DrainResult, StoreError>;
}

/// Handle to a spawned polling loop.
pub struct WorkerHandle {
    cancel: CancellationToken,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl WorkerHandle {
    /// Spawn `task` on the current tokio runtime, polling every `poll_interval`.
    pub fn spawn<T: PollingTask>(task: T, poll_interval: Duration) -> Self {
        Self::spawn_with_token(task, poll_interval, CancellationToken::new())
    }

    /// Spawn with an externally owned cancellation token, e.g. a child of the
    /// application's shutdown token.
    pub fn spawn_with_token<T: PollingTask>(
        task: T,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(run_loop(task, poll_interval, token));

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for the current batch to finish.
    ///
    /// A worker that panicked yields empty statistics.
    pub async fn stop(mut self) -> WorkerStats {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(error = %e, panicked = e.is_panic(), "Worker task ended abnormally");
                    WorkerStats::default()
                }
            },
            None => WorkerStats::default(),
        }
    }

    /// Signal the worker to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_loop<T: PollingTask>(
    task: T,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(worker = task.name(), interval_ms = poll_interval.as_millis() as u64, "Worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        stats.polls += 1;
        match task.run_once(&cancel).await {
            Ok(result) => {
                if !result.is_empty() {
                    debug!(
                        worker = task.name(),
                        claimed = result.claimed,
                        completed = result.completed,
                        retried = result.retried,
                        dead_lettered = result.dead_lettered,
                        "Batch drained"
                    );
                }
                stats.record(&result);
            }
            Err(e) => {
                stats.aborted_polls += 1;
                warn!(worker = task.name(), error = %e, "Poll aborted, retrying next interval");
            }
        }
    }

    info!(worker = task.name(), polls = stats.polls, "Worker stopped");
    stats
}
