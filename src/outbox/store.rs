use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::OutboxItem;
use crate::error::StoreError;
use crate::lease::Lease;

/// Durable storage for outbox items.
///
/// Implementations must make `claim_pending` atomic per item: two concurrent
/// claimants never both receive the same item while its lease is active.
/// Every other operation updates a single item atomically.
///
/// `mark_processed`, `mark_failed` and `release` take the claimant's lease
/// owner. They fail with [`StoreError::LeaseLost`] unless the item is still
/// claimed by that owner, so a claimant whose lease expired and was taken
/// over cannot overwrite the new claimant's work.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn add(&self, item: OutboxItem) -> Result<(), StoreError>;

    /// Claim up to `batch_size` items that are unprocessed, below
    /// `max_retries`, due (`next_retry_at` unset or reached) and not leased,
    /// oldest `created_at` first. Claimed items carry `lease`.
    async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        now: DateTime<Utc>,
        lease: &Lease,
    ) -> Result<Vec<OutboxItem>, StoreError>;

    /// Set `processed_at` (only the first call has an effect), clear
    /// `last_error` and the lease.
    async fn mark_processed(
        &self,
        id: &str,
        owner: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt: store `error`, increment `retry_count`, set
    /// `next_retry_at` (`None` for a dead letter) and clear the lease.
    async fn mark_failed(
        &self,
        id: &str,
        owner: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Drop the lease on a claimed item without recording an attempt.
    async fn release(&self, id: &str, owner: &str) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<OutboxItem>, StoreError>;

    /// Unprocessed items whose retry budget is spent.
    async fn dead_letters(&self, max_retries: u32) -> Result<Vec<OutboxItem>, StoreError>;

    /// Give a dead letter a fresh retry budget after manual intervention.
    async fn requeue(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: OutboxStore + ?Sized> OutboxStore for Arc<S> {
    async fn add(&self, item: OutboxItem) -> Result<(), StoreError> {
        (**self).add(item).await
    }

    async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        now: DateTime<Utc>,
        lease: &Lease,
    ) -> Result<Vec<OutboxItem>, StoreError> {
        (**self).claim_pending(batch_size, max_retries, now, lease).await
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

    async fn release(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        (**self).release(id, owner).await
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxItem>, StoreError> {
        (**self).get(id).await
    }

    async fn dead_letters(&self, max_retries: u32) -> Result<Vec<OutboxItem>, StoreError> {
        (**self).dead_letters(max_retries).await
    }

    async fn requeue(&self, id: &str) -> Result<(), StoreError> {
        (**self).requeue(id).await
    }
}
