//! Orchestrated sagas with reverse-order compensation.
//!
//! A [`SagaDefinition`] is an ordered list of [`SagaStep`]s, each a forward
//! [`StepAction`] and an optional compensation. [`SagaOrchestrator`] runs the
//! steps in order and persists a [`SagaInstance`] checkpoint after each one.
//! When a step fails, the completed steps are compensated last-to-first; a
//! failing compensation is recorded and the rollback continues.

mod in_memory;
mod instance;
mod orchestrator;
mod step;
mod store;

pub use in_memory::InMemorySagaStore;
pub use instance::{SagaInstance, SagaStatus};
pub use orchestrator::SagaOrchestrator;
pub use step::{DispatchStep, FnStep, SagaDefinition, SagaStep, StepAction};
pub use store::SagaStore;
