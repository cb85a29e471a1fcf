use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{InboxItem, InboxStore};
use crate::error::StoreError;

const KIND: &str = "inbox item";

/// Inbox store keyed by message id. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryInboxStore {
    items: Arc<RwLock<HashMap<String, InboxItem>>>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::LockPoisoned("inbox read"))?;
        Ok(items.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn update<F>(&self, message_id: &str, op: &'static str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut InboxItem),
    {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned(op))?;
        let item = items
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: KIND,
                id: message_id.to_string(),
            })?;
        f(item);
        Ok(())
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn add(&self, item: InboxItem) -> Result<(), StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned("inbox add"))?;
        if items.contains_key(&item.message_id) {
            return Err(StoreError::Duplicate {
                kind: KIND,
                id: item.message_id,
            });
        }
        items.insert(item.message_id.clone(), item);
        Ok(())
    }

    async fn get(&self, message_id: &str) -> Result<Option<InboxItem>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::LockPoisoned("inbox read"))?;
        Ok(items.get(message_id).cloned())
    }

    async fn mark_processed(
        &self,
        message_id: &str,
        response: Vec<u8>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(message_id, "inbox mark_processed", |item| {
            if item.processed_at.is_none() {
                item.processed_at = Some(processed_at);
                item.cached_response = Some(response);
                item.last_error = None;
                item.next_retry_at = None;
            }
        })
    }

    async fn mark_failed(
        &self,
        message_id: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.update(message_id, "inbox mark_failed", |item| {
            if item.processed_at.is_none() {
                item.last_error = Some(error.to_string());
                item.retry_count = item.retry_count.saturating_add(1);
                item.next_retry_at = next_retry_at;
            }
        })
    }

    async fn get_expired(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<InboxItem>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::LockPoisoned("inbox read"))?;
        let mut expired: Vec<InboxItem> = items
            .values()
            .filter(|item| item.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|item| item.expires_at);
        expired.truncate(batch_size);
        Ok(expired)
    }

    async fn remove(&self, message_ids: &[String]) -> Result<(), StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned("inbox remove"))?;
        for id in message_ids {
            items.remove(id);
        }
        Ok(())
    }
}
