//! Configuration for the background processors and the inbox gate.
//!
//! Every config struct has sensible defaults and `with_*` builder methods.
//! They also deserialize from JSON with all fields optional; durations are
//! written in milliseconds (`poll_interval_ms`, `base_retry_delay_ms`, ...).
//!
//! ```
//! use durable_messaging::MessagingConfig;
//!
//! let config = MessagingConfig::from_json_str(
//!     r#"{ "outbox": { "batch_size": 10, "max_retries": 3, "base_retry_delay_ms": 500 } }"#,
//! )
//! .unwrap();
//! assert_eq!(config.outbox.batch_size, 10);
//! assert_eq!(config.outbox.retry.max_retries, 3);
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::time::after;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_LEASE: Duration = Duration::from_secs(60);
const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_SWEEP_BATCH_SIZE: usize = 500;

/// Exponential retry policy shared by the outbox, inbox and scheduler.
///
/// The delay before retry `attempt` (1-based) is `base_delay * 2^(attempt - 1)`,
/// optionally capped at `max_delay`. Once `attempt` reaches `max_retries`
/// the item is exhausted and no further retry is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(rename = "base_retry_delay_ms", with = "millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_retry_delay_ms", with = "opt_millis")]
    pub max_delay: Option<Duration>,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay: None,
            max_retries,
        }
    }

    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        self.max_delay = Some(cap);
        self
    }

    /// Delay before retry number `attempt`. Attempt 0 has no delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = 1u32
            .checked_shl(attempt - 1)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }

    /// When the item that has now failed `attempt` times becomes eligible again,
    /// or `None` when the retry budget is spent.
    pub fn next_retry_at(&self, attempt: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_exhausted(attempt) {
            None
        } else {
            Some(after(now, self.backoff(attempt)))
        }
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}.max_retries must be at least 1",
                section
            )));
        }
        Ok(())
    }
}

/// Outbox processor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    pub batch_size: usize,
    #[serde(flatten)]
    pub retry: RetryPolicy,
    #[serde(rename = "lease_duration_ms", with = "millis")]
    pub lease_duration: Duration,
    pub worker_id: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            lease_duration: DEFAULT_LEASE,
            worker_id: format!("outbox-{}", std::process::id()),
        }
    }
}

impl OutboxConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.retry.max_retries = max;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_loop("outbox", self.poll_interval, self.batch_size, self.lease_duration)?;
        self.retry.validate("outbox")
    }
}

/// Scheduler processor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    pub batch_size: usize,
    #[serde(flatten)]
    pub retry: RetryPolicy,
    #[serde(rename = "lease_duration_ms", with = "millis")]
    pub lease_duration: Duration,
    pub worker_id: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            lease_duration: DEFAULT_LEASE,
            worker_id: format!("scheduler-{}", std::process::id()),
        }
    }
}

impl SchedulerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.retry.max_retries = max;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_loop("scheduler", self.poll_interval, self.batch_size, self.lease_duration)?;
        self.retry.validate("scheduler")
    }
}

/// Inbox gate and retention sweep settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    #[serde(rename = "inbox_retention_period_ms", with = "millis")]
    pub retention_period: Duration,
    #[serde(flatten)]
    pub retry: RetryPolicy,
    #[serde(rename = "sweep_interval_ms", with = "millis")]
    pub sweep_interval: Duration,
    pub sweep_batch_size: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            retention_period: DEFAULT_RETENTION,
            retry: RetryPolicy::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

impl InboxConfig {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_period = retention;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_period.is_zero() {
            return Err(ConfigError::Invalid(
                "inbox.inbox_retention_period_ms must be positive".into(),
            ));
        }
        if self.sweep_interval.is_zero() || self.sweep_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "inbox sweep interval and batch size must be positive".into(),
            ));
        }
        self.retry.validate("inbox")
    }
}

/// Combined configuration for all mechanisms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub outbox: OutboxConfig,
    pub inbox: InboxConfig,
    pub scheduler: SchedulerConfig,
}

impl MessagingConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: MessagingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.outbox.validate()?;
        self.inbox.validate()?;
        self.scheduler.validate()
    }
}

fn validate_loop(
    section: &str,
    poll_interval: Duration,
    batch_size: usize,
    lease: Duration,
) -> Result<(), ConfigError> {
    if poll_interval.is_zero() {
        return Err(ConfigError::Invalid(format!(
            "{}.poll_interval_ms must be positive",
            section
        )));
    }
    if batch_size == 0 {
        return Err(ConfigError::Invalid(format!(
            "{}.batch_size must be positive",
            section
        )));
    }
    if lease.is_zero() {
        return Err(ConfigError::Invalid(format!(
            "{}.lease_duration_ms must be positive",
            section
        )));
    }
    Ok(())
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis().min(u64::MAX as u128) as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}
