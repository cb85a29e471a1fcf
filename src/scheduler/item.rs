use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RecurrenceRule;
use crate::codec;
use crate::error::{DispatchError, RecurrenceError};
use crate::lease::lease_expired;

/// A command to dispatch at or after `scheduled_at`, once or on a recurrence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub id: String,
    pub type_tag: String,
    pub payload: Vec<u8>,
    pub scheduled_at: DateTime<Utc>,
    /// Never set for recurring items.
    pub processed_at: Option<DateTime<Utc>>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
}

impl ScheduledItem {
    /// A one-shot item due at `at`.
    pub fn once(type_tag: impl Into<String>, payload: Vec<u8>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            type_tag: type_tag.into(),
            payload,
            scheduled_at: at,
            processed_at: None,
            last_executed_at: None,
            is_recurring: false,
            recurrence_rule: None,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            claimed_by: None,
            claimed_until: None,
        }
    }

    /// A one-shot item with a bitcode-encoded payload.
    pub fn encode_once<T: Serialize>(
        type_tag: impl Into<String>,
        payload: &T,
        at: DateTime<Utc>,
    ) -> Result<Self, DispatchError> {
        Ok(Self::once(type_tag, codec::encode(payload)?, at))
    }

    /// A recurring item whose first occurrence is the first one after `now`.
    pub fn recurring(
        type_tag: impl Into<String>,
        payload: Vec<u8>,
        rule: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, RecurrenceError> {
        let parsed = RecurrenceRule::parse(rule)?;
        let first = parsed.next_after(now)?;

        let mut item = Self::once(type_tag, payload, first);
        item.is_recurring = true;
        item.recurrence_rule = Some(parsed.as_str().to_string());
        Ok(item)
    }

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

    pub fn is_dead_lettered(&self, max_retries: u32) -> bool {
        !self.is_processed() && self.retry_count >= max_retries
    }

    pub fn is_due(&self, max_retries: u32, now: DateTime<Utc>) -> bool {
        !self.is_processed()
            && self.retry_count < max_retries
            && self.scheduled_at <= now
            && self.next_retry_at.map(|at| at <= now).unwrap_or(true)
            && lease_expired(self.claimed_until, now)
    }

    /// Parse the stored recurrence rule.
    pub fn rule(&self) -> Result<Option<RecurrenceRule>, RecurrenceError> {
        match (&self.recurrence_rule, self.is_recurring) {
            (Some(rule), true) => RecurrenceRule::parse(rule).map(Some),
            (None, true) => Err(RecurrenceError::InvalidCron {
                expr: String::new(),
                reason: "recurring item has no recurrence rule".into(),
            }),
            (_, false) => Ok(None),
        }
    }
}
