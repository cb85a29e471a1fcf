use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::after;

/// Deduplication record for an inbound message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxItem {
    /// Externally supplied deduplication key.
    pub message_id: String,
    pub request_type: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// Encoded handler result, immutable once `processed_at` is set.
    pub cached_response: Option<Vec<u8>>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl InboxItem {
    pub fn new(
        message_id: impl Into<String>,
        request_type: impl Into<String>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            request_type: request_type.into(),
            received_at: now,
            processed_at: None,
            expires_at: after(now, retention),
            cached_response: None,
            last_error: None,
            retry_count: 0,
            next_retry_at: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
