//! Reliable messaging primitives: a transactional outbox, an idempotent
//! inbox, orchestrated sagas with compensation, and a scheduler for deferred
//! and recurring commands.
//!
//! Storage and dispatch are traits. The in-memory stores shipped here are
//! complete implementations suitable for tests and single-process use.

pub mod codec;
mod config;
mod dispatch;
mod error;
pub mod inbox;
mod lease;
pub mod outbox;
pub mod saga;
pub mod scheduler;
mod time;
mod worker;

pub use config::{InboxConfig, MessagingConfig, OutboxConfig, RetryPolicy, SchedulerConfig};
pub use dispatch::{Dispatcher, HandlerRegistry, LogDispatcher};
pub use error::{
    ConfigError, DispatchError, InboxError, RecurrenceError, SagaError, StoreError,
};
pub use inbox::{InMemoryInboxStore, InboxGate, InboxItem, InboxStore, InboxSweeper};
pub use lease::Lease;
pub use outbox::{InMemoryOutboxStore, OutboxItem, OutboxProcessor, OutboxStore};
pub use saga::{
    DispatchStep, FnStep, InMemorySagaStore, SagaDefinition, SagaInstance, SagaOrchestrator,
    SagaStatus, SagaStep, SagaStore, StepAction,
};
pub use scheduler::{
    InMemorySchedulerStore, RecurrenceRule, ScheduledItem, SchedulerProcessor, SchedulerStore,
};
pub use worker::{DrainResult, ItemOutcome, PollingTask, WorkerHandle, WorkerStats};

// Re-exported so callers can build tokens without a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
