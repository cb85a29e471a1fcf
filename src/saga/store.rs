use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::SagaInstance;
use crate::error::StoreError;

/// Durable storage for saga checkpoints.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Insert a new instance. Fails with [`StoreError::Duplicate`] if the id exists.
    async fn create(&self, instance: SagaInstance) -> Result<(), StoreError>;

    async fn get(&self, saga_id: &str) -> Result<Option<SagaInstance>, StoreError>;

    /// Replace the stored instance if its version still equals
    /// `expected_version`, otherwise fail with [`StoreError::ConcurrentWrite`].
    async fn update(&self, instance: SagaInstance, expected_version: u64) -> Result<(), StoreError>;

    /// Non-terminal instances with no progress for at least `threshold`.
    async fn find_stalled(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SagaInstance>, StoreError>;
}

#[async_trait]
impl<S: SagaStore + ?Sized> SagaStore for Arc<S> {
    async fn create(&self, instance: SagaInstance) -> Result<(), StoreError> {
        (**self).create(instance).await
    }

    async fn get(&self, saga_id: &str) -> Result<Option<SagaInstance>, StoreError> {
        (**self).get(saga_id).await
    }

    async fn update(&self, instance: SagaInstance, expected_version: u64) -> Result<(), StoreError> {
        (**self).update(instance, expected_version).await
    }

    async fn find_stalled(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SagaInstance>, StoreError> {
        (**self).find_stalled(threshold, now).await
    }
}
