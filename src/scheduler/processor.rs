use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{RecurrenceRule, ScheduledItem, SchedulerStore};
use crate::config::SchedulerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ConfigError, StoreError};
use crate::lease::Lease;
use crate::worker::{DrainResult, ItemOutcome, PollingTask, WorkerHandle};

/// Claims due scheduled items and dispatches them as commands.
///
/// One-shot items are completed after a successful dispatch. Recurring
/// items move on to their next occurrence, both after a success and after
/// an occurrence has exhausted its retries.
pub struct SchedulerProcessor<S, D> {
    store: S,
    dispatcher: D,
    config: SchedulerConfig,
}

impl<S, D> SchedulerProcessor<S, D>
where
    S: SchedulerStore + 'static,
    D: Dispatcher + 'static,
{
    /// Fails when `config` does not pass [`SchedulerConfig::validate`].
    pub fn new(store: S, dispatcher: D, config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            dispatcher,
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn tick(&self, cancel: &CancellationToken) -> Result<DrainResult, StoreError> {
        self.tick_at(Utc::now(), cancel).await
    }

    /// Dispatch every item due as of `now`, up to the batch size.
    pub async fn tick_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<DrainResult, StoreError> {
        if cancel.is_cancelled() {
            return Ok(DrainResult::default());
        }

        let lease = Lease::new(&self.config.worker_id, now, self.config.lease_duration);
        let items = self
            .store
            .claim_due(
                self.config.batch_size,
                self.config.retry.max_retries,
                now,
                &lease,
            )
            .await?;

        let mut result = DrainResult {
            claimed: items.len(),
            ..Default::default()
        };

        for item in &items {
            if cancel.is_cancelled() {
                match self.store.release(&item.id, &self.config.worker_id).await {
                    Ok(()) => result.released += 1,
                    Err(e) => {
                        warn!(item_id = %item.id, error = %e, "Failed to release scheduled item");
                        result.store_errors += 1;
                    }
                }
                continue;
            }

            let outcome = self.process_item(item, now).await;
            if let Err(e) = &outcome {
                warn!(item_id = %item.id, error = %e, "Failed to record scheduled outcome");
            }
            result.record(&outcome);
        }

        Ok(result)
    }

    /// Dispatch a single claimed item and record the outcome.
    pub async fn process_item(
        &self,
        item: &ScheduledItem,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, StoreError> {
        // A broken rule fails before dispatch so the command never runs
        // without a way to schedule its next occurrence.
        let rule = match item.rule() {
            Ok(rule) => rule,
            Err(e) => return self.fail(item, now, e.to_string(), None).await,
        };

        if let Err(e) = self.dispatcher.dispatch(&item.type_tag, &item.payload).await {
            return self.fail(item, now, e.to_string(), rule.as_ref()).await;
        }

        match rule.map(|rule| rule.next_after(now)) {
            None => {
                self.store
                    .mark_processed(&item.id, &self.config.worker_id, now)
                    .await?;
                debug!(item_id = %item.id, type_tag = %item.type_tag, "Scheduled item dispatched");
                Ok(ItemOutcome::Completed)
            }
            Some(Ok(next_at)) => {
                self.store
                    .reschedule(&item.id, &self.config.worker_id, next_at, now)
                    .await?;
                debug!(
                    item_id = %item.id,
                    type_tag = %item.type_tag,
                    next_at = %next_at,
                    "Recurring item dispatched"
                );
                Ok(ItemOutcome::Rescheduled { next_at })
            }
            Some(Err(e)) => {
                self.store
                    .mark_processed(&item.id, &self.config.worker_id, now)
                    .await?;
                info!(item_id = %item.id, reason = %e, "Recurring item has no further occurrences");
                Ok(ItemOutcome::Completed)
            }
        }
    }

    async fn fail(
        &self,
        item: &ScheduledItem,
        now: DateTime<Utc>,
        message: String,
        rule: Option<&RecurrenceRule>,
    ) -> Result<ItemOutcome, StoreError> {
        let owner = self.config.worker_id.as_str();
        let retry_count = item.retry_count.saturating_add(1);

        if let Some(next_retry_at) = self.config.retry.next_retry_at(retry_count, now) {
            self.store
                .mark_failed(&item.id, owner, &message, Some(next_retry_at))
                .await?;
            warn!(
                item_id = %item.id,
                type_tag = %item.type_tag,
                retry_count,
                next_retry_at = %next_retry_at,
                error = %message,
                "Scheduled dispatch failed, will retry"
            );
            return Ok(ItemOutcome::Retrying {
                retry_count,
                next_retry_at,
            });
        }

        if let Some(next_at) = rule.and_then(|rule| rule.next_after(now).ok()) {
            self.store
                .skip_occurrence(&item.id, owner, &message, next_at)
                .await?;
            error!(
                item_id = %item.id,
                type_tag = %item.type_tag,
                retry_count,
                next_at = %next_at,
                error = %message,
                "Recurring occurrence dropped after exhausting retries"
            );
            return Ok(ItemOutcome::Skipped { next_at });
        }

        self.store
            .mark_failed(&item.id, owner, &message, None)
            .await?;
        error!(
            item_id = %item.id,
            type_tag = %item.type_tag,
            retry_count,
            error = %message,
            "Scheduled item dead-lettered"
        );
        Ok(ItemOutcome::DeadLettered { retry_count })
    }

    pub fn spawn(self) -> WorkerHandle {
        let interval = self.config.poll_interval;
        info!(worker = %self.config.worker_id, "Spawning scheduler");
        WorkerHandle::spawn(self, interval)
    }
}

#[async_trait]
impl<S, D> PollingTask for SchedulerProcessor<S, D>
where
    S: SchedulerStore + 'static,
    D: Dispatcher + 'static,
{
    fn name(&self) -> &str {
        &self.config.worker_id
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<DrainResult, StoreError> {
        self.tick(cancel).await
    }
}
