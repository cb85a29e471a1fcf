use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{OutboxItem, OutboxStore};
use crate::error::StoreError;
use crate::lease::Lease;

const KIND: &str = "outbox item";

/// Outbox store backed by a shared `Vec`. Clones share the same storage.
///
/// Claims happen under the write lock, so concurrent processors sharing one
/// store never receive the same item while its lease is active.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    items: Arc<RwLock<Vec<OutboxItem>>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored item, in insertion order.
    pub fn items(&self) -> Result<Vec<OutboxItem>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(items.clone())
    }

    fn update<F>(&self, id: &str, op: &'static str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut OutboxItem) -> Result<(), StoreError>,
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
        f(item)
    }

    /// Apply `f` to an item still claimed by `owner`, then drop the lease.
    fn settle<F>(&self, id: &str, owner: &str, op: &'static str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut OutboxItem),
    {
        self.update(id, op, |item| {
            if item.claimed_by.as_deref() != Some(owner) {
                return Err(StoreError::LeaseLost {
                    kind: KIND,
                    id: item.id.clone(),
                    owner: owner.to_string(),
                });
            }
            f(item);
            item.claimed_by = None;
            item.claimed_until = None;
            Ok(())
        })
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn add(&self, item: OutboxItem) -> Result<(), StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox add"))?;
        if items.iter().any(|existing| existing.id == item.id) {
            return Err(StoreError::Duplicate {
                kind: KIND,
                id: item.id,
            });
        }
        items.push(item);
        Ok(())
    }

    async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        now: DateTime<Utc>,
        lease: &Lease,
    ) -> Result<Vec<OutboxItem>, StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox claim"))?;

        let mut eligible: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_claimable(max_retries, now))
            .map(|(idx, _)| idx)
            .collect();
        eligible.sort_by_key(|&idx| items[idx].created_at);
        eligible.truncate(batch_size);

        let mut claimed = Vec::with_capacity(eligible.len());
        for idx in eligible {
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
        self.settle(id, owner, "outbox mark_processed", |item| {
            if item.processed_at.is_none() {
                item.processed_at = Some(processed_at);
            }
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
        self.settle(id, owner, "outbox mark_failed", |item| {
            item.last_error = Some(error.to_string());
            item.retry_count = item.retry_count.saturating_add(1);
            item.next_retry_at = next_retry_at;
        })
    }

    async fn release(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        self.settle(id, owner, "outbox release", |_| {})
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxItem>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(items.iter().find(|item| item.id == id).cloned())
    }

    async fn dead_letters(&self, max_retries: u32) -> Result<Vec<OutboxItem>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(items
            .iter()
            .filter(|item| item.is_dead_lettered(max_retries))
            .cloned()
            .collect())
    }

    async fn requeue(&self, id: &str) -> Result<(), StoreError> {
        self.update(id, "outbox requeue", |item| {
            if item.processed_at.is_none() {
                item.retry_count = 0;
                item.next_retry_at = None;
                item.claimed_by = None;
                item.claimed_until = None;
            }
            Ok(())
        })
    }
}
