use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::InboxItem;
use crate::error::StoreError;

/// Durable storage for inbox deduplication records.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::Duplicate`] when the
    /// message id already exists, which is how concurrent first deliveries
    /// are told apart.
    async fn add(&self, item: InboxItem) -> Result<(), StoreError>;

    async fn get(&self, message_id: &str) -> Result<Option<InboxItem>, StoreError>;

    /// Record success. The first response stored wins; later calls for an
    /// already processed message leave it unchanged.
    async fn mark_processed(
        &self,
        message_id: &str,
        response: Vec<u8>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt and increment `retry_count`.
    async fn mark_failed(
        &self,
        message_id: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Up to `batch_size` records whose `expires_at` has passed.
    async fn get_expired(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<InboxItem>, StoreError>;

    /// Delete records by message id. Unknown ids are ignored.
    async fn remove(&self, message_ids: &[String]) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: InboxStore + ?Sized> InboxStore for Arc<S> {
    async fn add(&self, item: InboxItem) -> Result<(), StoreError> {
        (**self).add(item).await
    }

    async fn get(&self, message_id: &str) -> Result<Option<InboxItem>, StoreError> {
        (**self).get(message_id).await
    }

    async fn mark_processed(
        &self,
        message_id: &str,
        response: Vec<u8>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).mark_processed(message_id, response, processed_at).await
    }

    async fn mark_failed(
        &self,
        message_id: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        (**self).mark_failed(message_id, error, next_retry_at).await
    }

    async fn get_expired(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<InboxItem>, StoreError> {
        (**self).get_expired(batch_size, now).await
    }

    async fn remove(&self, message_ids: &[String]) -> Result<(), StoreError> {
        (**self).remove(message_ids).await
    }
}
