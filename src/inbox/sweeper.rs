use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::InboxStore;
use crate::config::InboxConfig;
use crate::error::{ConfigError, StoreError};
use crate::worker::{DrainResult, PollingTask, WorkerHandle};

/// Deletes inbox records past their `expires_at`.
pub struct InboxSweeper<S> {
    store: S,
    config: InboxConfig,
}

impl<S: InboxStore + 'static> InboxSweeper<S> {
    pub fn new(store: S, config: InboxConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Remove every record expired as of `now`, one batch at a time.
    /// Returns the number of records removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.purge(now, &CancellationToken::new()).await
    }

    async fn purge(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<usize, StoreError> {
        let batch_size = self.config.sweep_batch_size;
        let mut removed = 0;

        while !cancel.is_cancelled() {
            let expired = self.store.get_expired(batch_size, now).await?;
            if expired.is_empty() {
                break;
            }

            let ids: Vec<String> = expired.into_iter().map(|item| item.message_id).collect();
            self.store.remove(&ids).await?;
            removed += ids.len();
            debug!(count = ids.len(), "Removed expired inbox records");

            if ids.len() < batch_size {
                break;
            }
        }

        Ok(removed)
    }

    /// Run the sweep as a background worker every `sweep_interval`.
    pub fn spawn(self) -> WorkerHandle {
        let interval = self.config.sweep_interval;
        info!(interval_ms = interval.as_millis() as u64, "Spawning inbox sweeper");
        WorkerHandle::spawn(self, interval)
    }
}

#[async_trait]
impl<S: InboxStore + 'static> PollingTask for InboxSweeper<S> {
    fn name(&self) -> &str {
        "inbox-sweeper"
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<DrainResult, StoreError> {
        let removed = self.purge(Utc::now(), cancel).await?;
        Ok(DrainResult {
            claimed: removed,
            completed: removed,
            ..Default::default()
        })
    }
}
