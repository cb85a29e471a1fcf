use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{SagaInstance, SagaStore};
use crate::error::StoreError;
use crate::time::after;

const KIND: &str = "saga";

/// Saga store keyed by saga id. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<String, SagaInstance>>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(&self, instance: SagaInstance) -> Result<(), StoreError> {
        let mut sagas = self
            .sagas
            .write()
            .map_err(|_| StoreError::LockPoisoned("saga create"))?;
        if sagas.contains_key(&instance.saga_id) {
            return Err(StoreError::Duplicate {
                kind: KIND,
                id: instance.saga_id,
            });
        }
        sagas.insert(instance.saga_id.clone(), instance);
        Ok(())
    }

    async fn get(&self, saga_id: &str) -> Result<Option<SagaInstance>, StoreError> {
        let sagas = self
            .sagas
            .read()
            .map_err(|_| StoreError::LockPoisoned("saga read"))?;
        Ok(sagas.get(saga_id).cloned())
    }

    async fn update(&self, instance: SagaInstance, expected_version: u64) -> Result<(), StoreError> {
        let mut sagas = self
            .sagas
            .write()
            .map_err(|_| StoreError::LockPoisoned("saga update"))?;
        let stored = sagas
            .get_mut(&instance.saga_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: KIND,
                id: instance.saga_id.clone(),
            })?;
        if stored.version != expected_version {
            return Err(StoreError::ConcurrentWrite {
                id: instance.saga_id,
                expected: expected_version,
                actual: stored.version,
            });
        }
        *stored = instance;
        Ok(())
    }

    async fn find_stalled(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SagaInstance>, StoreError> {
        let sagas = self
            .sagas
            .read()
            .map_err(|_| StoreError::LockPoisoned("saga read"))?;
        let mut stalled: Vec<SagaInstance> = sagas
            .values()
            .filter(|saga| !saga.is_terminal() && after(saga.last_updated_at, threshold) <= now)
            .cloned()
            .collect();
        stalled.sort_by_key(|saga| saga.last_updated_at);
        Ok(stalled)
    }
}
