use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec;
use crate::error::DispatchError;
use crate::lease::lease_expired;

/// Durable outbound notification, written in the same unit of work as the
/// business change that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: String,
    pub type_tag: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
}

impl OutboxItem {
    /// Create a new item with a generated id and a raw payload.
    pub fn new(type_tag: impl Into<String>, payload: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            type_tag: type_tag.into(),
            payload,
            created_at: now,
            processed_at: None,
            last_error: None,
            retry_count: 0,
            next_retry_at: None,
            claimed_by: None,
            claimed_until: None,
        }
    }

    /// Create a new item with a bitcode-encoded payload.
    pub fn encode<T: Serialize>(
        type_tag: impl Into<String>,
        payload: &T,
        now: DateTime<Utc>,
    ) -> Result<Self, DispatchError> {
        Ok(Self::new(type_tag, codec::encode(payload)?, now))
    }

    /// Use a caller-supplied id, e.g. `"{aggregate_id}:{event}:{version}"`.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        codec::decode(&self.payload)
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Unprocessed with its retry budget spent: excluded from every future claim.
    pub fn is_dead_lettered(&self, max_retries: u32) -> bool {
        !self.is_processed() && self.retry_count >= max_retries
    }

    pub fn is_claimable(&self, max_retries: u32, now: DateTime<Utc>) -> bool {
        !self.is_processed()
            && self.retry_count < max_retries
            && self.next_retry_at.map(|at| at <= now).unwrap_or(true)
            && lease_expired(self.claimed_until, now)
    }
}
