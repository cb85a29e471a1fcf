use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ScheduledItem;
use crate::error::StoreError;
use crate::lease::Lease;

/// Durable storage for scheduled items.
///
/// `claim_due` must be atomic per item, like [`OutboxStore::claim_pending`].
/// Every write taking an `owner` fails with [`StoreError::LeaseLost`] unless
/// the item is still claimed by that owner.
///
/// [`OutboxStore::claim_pending`]: crate::outbox::OutboxStore::claim_pending
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn add(&self, item: ScheduledItem) -> Result<(), StoreError>;

    /// Claim up to `batch_size` due items, earliest `scheduled_at` first.
    async fn claim_due(
        &self,
        batch_size: usize,
        max_retries: u32,
        now: DateTime<Utc>,
        lease: &Lease,
    ) -> Result<Vec<ScheduledItem>, StoreError>;

    /// Complete a one-shot item.
    async fn mark_processed(
        &self,
        id: &str,
        owner: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt and increment `retry_count`.
    async fn mark_failed(
        &self,
        id: &str,
        owner: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Move a recurring item to its next occurrence after a successful run.
    /// Resets the retry bookkeeping.
    async fn reschedule(
        &self,
        id: &str,
        owner: &str,
        next_scheduled_at: DateTime<Utc>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Give up on the current occurrence of a recurring item and move it to
    /// the next one, keeping `error` as `last_error`.
    async fn skip_occurrence(
        &self,
        id: &str,
        owner: &str,
        error: &str,
        next_scheduled_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn release(&self, id: &str, owner: &str) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<ScheduledItem>, StoreError>;

    /// Remove an item that has not been processed. Returns whether anything
    /// was removed.
    async fn cancel(&self, id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S: SchedulerStore + ?Sized> SchedulerStore for Arc<S> {
    async fn add(&self, item: ScheduledItem) -> Result<(), StoreError> {
        (**self).add(item).await
    }

    async fn claim_due(
        &self,
        batch_size: usize,
        max_retries: u32,
        now: DateTime<Utc>,
        lease: &Lease,
    ) -> Result<Vec<ScheduledItem>, StoreError> {
        (**self).claim_due(batch_size, max_retries, now, lease).await
    }

    async fn mark_processed(
        &self,
        id: &str,
        owner: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).mark_processed(id, owner, processed_at).await
    }

    async fn mark_failed(
        &self,
        id: &str,
        owner: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        (**self).mark_failed(id, owner, error, next_retry_at).await
    }

    async fn reschedule(
        &self,
        id: &str,
        owner: &str,
        next_scheduled_at: DateTime<Utc>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self)
            .reschedule(id, owner, next_scheduled_at, executed_at)
            .await
    }

    async fn skip_occurrence(
        &self,
        id: &str,
        owner: &str,
        error: &str,
        next_scheduled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self)
            .skip_occurrence(id, owner, error, next_scheduled_at)
            .await
    }

    async fn release(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        (**self).release(id, owner).await
    }

    async fn get(&self, id: &str) -> Result<Option<ScheduledItem>, StoreError> {
        (**self).get(id).await
    }

    async fn cancel(&self, id: &str) -> Result<bool, StoreError> {
        (**self).cancel(id).await
    }
}
