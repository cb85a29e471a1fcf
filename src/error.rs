//! Error types shared by the outbox, inbox, saga and scheduler mechanisms.

use thiserror::Error;

use crate::saga::SagaStatus;

/// Errors raised by a durable store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The in-process lock guarding the store was poisoned.
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),

    /// No record exists for the given id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with the given id already exists.
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// Optimistic concurrency check failed.
    #[error("concurrent write detected for {id} (expected version {expected}, got {actual})")]
    ConcurrentWrite {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// The claimed item's lease now belongs to another claimant.
    #[error("{kind} {id} is no longer leased to {owner}")]
    LeaseLost {
        kind: &'static str,
        id: String,
        owner: String,
    },

    /// The backing storage could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while resolving or executing a dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler is registered for the type tag.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// The payload could not be decoded into the handler's input type.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The handler's result could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The handler ran and reported a failure.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The handler rejected the request (validation, invariant violation).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl DispatchError {
    pub fn handler(msg: impl Into<String>) -> Self {
        DispatchError::Handler(msg.into())
    }
}

/// Errors surfaced by the inbox gate to the caller.
#[derive(Error, Debug)]
pub enum InboxError {
    #[error("inbox store error: {0}")]
    Store(#[from] StoreError),

    /// The wrapped handler failed; the failure has been recorded on the inbox item.
    #[error("handler failed for message {message_id}: {source}")]
    Handler {
        message_id: String,
        #[source]
        source: DispatchError,
    },

    #[error("cached response decoding failed: {0}")]
    Decode(String),

    #[error("inbox processing cancelled for message {0}")]
    Cancelled(String),
}

/// Errors raised by the saga orchestrator.
///
/// Step and compensation failures are not errors: they are recorded on the
/// saga instance and reflected in its status.
#[derive(Error, Debug)]
pub enum SagaError {
    #[error("saga store error: {0}")]
    Store(#[from] StoreError),

    #[error("saga state encoding failed: {0}")]
    Encode(String),

    #[error("saga state decoding failed: {0}")]
    Decode(String),

    /// A persisted instance does not belong to the definition driving it.
    #[error("saga {saga_id} has type {actual} but definition is {expected}")]
    DefinitionMismatch {
        saga_id: String,
        expected: String,
        actual: String,
    },

    /// The persisted checkpoint points past the end of the definition.
    #[error("saga {saga_id} is at step {step} but definition has {steps} steps")]
    StepOutOfRange {
        saga_id: String,
        step: usize,
        steps: usize,
    },

    /// A status change not allowed by the saga state machine.
    #[error("saga {saga_id} cannot move from {from} to {to}")]
    InvalidTransition {
        saga_id: String,
        from: SagaStatus,
        to: SagaStatus,
    },

    #[error("saga {0} cancelled")]
    Cancelled(String),
}

/// Errors raised while parsing a recurrence rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid interval {0:?}, expected @every <n><s|m|h|d>")]
    InvalidInterval(String),

    #[error("rule {0:?} has no occurrence after the given time")]
    NoNextOccurrence(String),
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
