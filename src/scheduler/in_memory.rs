use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ScheduledItem, SchedulerStore};
use crate::error::StoreError;
use crate::lease::Lease;

const KIND: &str = "scheduled item";

/// Scheduler store backed by a shared `Vec`. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemorySchedulerStore {
    items: Arc<RwLock<Vec<ScheduledItem>>>,
}

impl InMemorySchedulerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Result<Vec<ScheduledItem>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::LockPoisoned("scheduler read"))?;
        Ok(items.clone())
    }

    /// Apply `f` to an item still claimed by `owner`, then drop the lease.
    fn settle<F>(&self, id: &str, owner: &str, op: &'static str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ScheduledItem),
    {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned(op))?;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: KIND,
                id: id.to_string(),
            })?;
        if item.claimed_by.as_deref() != Some(owner) {
            return Err(StoreError::LeaseLost {
                kind: KIND,
                id: id.to_string(),
                owner: owner.to_string(),
            });
        }
        f(item);
        item.claimed_by = None;
        item.claimed_until = None;
        Ok(())
    }
}

#[async_trait]
impl SchedulerStore for InMemorySchedulerStore {
    async fn add(&self, item: ScheduledItem) -> Result<(), StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned("scheduler add"))?;
        if items.iter().any(|existing| existing.id == item.id) {
            return Err(StoreError::Duplicate {
                kind: KIND,
                id: item.id,
            });
        }
        items.push(item);
        Ok(())
    }

    async fn claim_due(
        &self,
        batch_size: usize,
        max_retries: u32,
        now: DateTime<Utc>,
        lease: &Lease,
    ) -> Result<Vec<ScheduledItem>, StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned("scheduler claim"))?;

        let mut due: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_due(max_retries, now))
            .map(|(idx, _)| idx)
            .collect();
        due.sort_by_key(|&idx| items[idx].scheduled_at);
        due.truncate(batch_size);

        let mut claimed = Vec::with_capacity(due.len());
        for idx in due {
            let item = &mut items[idx];
            item.claimed_by = Some(lease.owner.clone());
            item.claimed_until = Some(lease.until);
            claimed.push(item.clone());
        }
        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        id: &str,
        owner: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.settle(id, owner, "scheduler mark_processed", |item| {
            if item.processed_at.is_none() {
                item.processed_at = Some(processed_at);
            }
            item.last_executed_at = Some(processed_at);
            item.last_error = None;
            item.next_retry_at = None;
        })
    }

    async fn mark_failed(
        &self,
        id: &str,
        owner: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.settle(id, owner, "scheduler mark_failed", |item| {
            item.last_error = Some(error.to_string());
            item.retry_count = item.retry_count.saturating_add(1);
            item.next_retry_at = next_retry_at;
        })
    }

    async fn reschedule(
        &self,
        id: &str,
        owner: &str,
        next_scheduled_at: DateTime<Utc>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.settle(id, owner, "scheduler reschedule", |item| {
            item.scheduled_at = next_scheduled_at;
            item.last_executed_at = Some(executed_at);
            item.last_error = None;
            item.retry_count = 0;
            item.next_retry_at = None;
        })
    }

    async fn skip_occurrence(
        &self,
        id: &str,
        owner: &str,
        error: &str,
        next_scheduled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.settle(id, owner, "scheduler skip_occurrence", |item| {
            item.scheduled_at = next_scheduled_at;
            item.last_error = Some(error.to_string());
            item.retry_count = 0;
            item.next_retry_at = None;
        })
    }

    async fn release(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        self.settle(id, owner, "scheduler release", |_| {})
    }

    async fn get(&self, id: &str) -> Result<Option<ScheduledItem>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::LockPoisoned("scheduler read"))?;
        Ok(items.iter().find(|item| item.id == id).cloned())
    }

    async fn cancel(&self, id: &str) -> Result<bool, StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned("scheduler cancel"))?;
        let before = items.len();
        items.retain(|item| item.id != id || item.is_processed());
        Ok(items.len() < before)
    }
}
