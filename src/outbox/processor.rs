use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{OutboxItem, OutboxStore};
use crate::config::OutboxConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ConfigError, StoreError};
use crate::lease::Lease;
use crate::worker::{DrainResult, ItemOutcome, PollingTask, WorkerHandle};

/// Claims pending outbox items and publishes them through a [`Dispatcher`].
///
/// Each item is handled independently: a failed publish is recorded on the
/// item and retried on a later tick after its backoff, until the retry budget
/// is spent and the item is left as a dead letter.
pub struct OutboxProcessor<S, D> {
    store: S,
    dispatcher: D,
    config: OutboxConfig,
}

impl<S, D> OutboxProcessor<S, D>
where
    S: OutboxStore + 'static,
    D: Dispatcher + 'static,
{
    /// Fails when `config` does not pass [`OutboxConfig::validate`].
    pub fn new(store: S, dispatcher: D, config: OutboxConfig) -> Result<Self, ConfigError> {
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

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Drain one batch at the current time.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<DrainResult, StoreError> {
        self.tick_at(Utc::now(), cancel).await
    }

    /// Drain one batch as of `now`.
    ///
    /// Returns `Err` only when the batch could not be claimed. If `cancel`
    /// fires mid-batch, the items not yet processed are released untouched.
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
            .claim_pending(
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
                        warn!(item_id = %item.id, error = %e, "Failed to release outbox item");
                        result.store_errors += 1;
                    }
                }
                continue;
            }

            let outcome = self.process_item(item, now).await;
            if let Err(e) = &outcome {
                warn!(item_id = %item.id, error = %e, "Failed to record outbox outcome");
            }
            result.record(&outcome);
        }

        Ok(result)
    }

    /// Publish a single item claimed under this processor's `worker_id` and
    /// record the outcome.
    ///
    /// Dispatch failures, including unknown tags and undecodable payloads,
    /// become retry bookkeeping. Only a failure to write that bookkeeping
    /// back to the store is returned as an error, e.g.
    /// [`StoreError::LeaseLost`] when the lease expired and another
    /// processor took the item over.
    pub async fn process_item(
        &self,
        item: &OutboxItem,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, StoreError> {
        match self.dispatcher.publish(&item.type_tag, &item.payload).await {
            Ok(()) => {
                self.store
                    .mark_processed(&item.id, &self.config.worker_id, now)
                    .await?;
                debug!(item_id = %item.id, type_tag = %item.type_tag, "Outbox item published");
                Ok(ItemOutcome::Completed)
            }
            Err(e) => {
                let retry_count = item.retry_count.saturating_add(1);
                let next_retry_at = self.config.retry.next_retry_at(retry_count, now);
                let message = e.to_string();
                self.store
                    .mark_failed(&item.id, &self.config.worker_id, &message, next_retry_at)
                    .await?;

                match next_retry_at {
                    Some(next_retry_at) => {
                        warn!(
                            item_id = %item.id,
                            type_tag = %item.type_tag,
                            retry_count,
                            next_retry_at = %next_retry_at,
                            error = %message,
                            "Outbox publish failed, will retry"
                        );
                        Ok(ItemOutcome::Retrying {
                            retry_count,
                            next_retry_at,
                        })
                    }
                    None => {
                        error!(
                            item_id = %item.id,
                            type_tag = %item.type_tag,
                            retry_count,
                            error = %message,
                            "Outbox item dead-lettered"
                        );
                        Ok(ItemOutcome::DeadLettered { retry_count })
                    }
                }
            }
        }
    }

    /// Run the processor as a background worker on its configured interval.
    pub fn spawn(self) -> WorkerHandle {
        let interval = self.config.poll_interval;
        info!(worker = %self.config.worker_id, "Spawning outbox processor");
        WorkerHandle::spawn(self, interval)
    }
}

#[async_trait]
impl<S, D> PollingTask for OutboxProcessor<S, D>
where
    S: OutboxStore + 'static,
    D: Dispatcher + 'static,
{
    fn name(&self) -> &str {
        &self.config.worker_id
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<DrainResult, StoreError> {
        self.tick(cancel).await
    }
}
