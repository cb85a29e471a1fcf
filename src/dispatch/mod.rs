//! Dispatcher abstraction.
//!
//! The core never resolves type tags itself. Every stored item carries an
//! opaque type tag and a byte payload; a [`Dispatcher`] turns that pair into
//! executed code. [`HandlerRegistry`] is the explicit tag → handler table
//! applications register their commands and notifications in.
//!
//! ```text
//!  OutboxProcessor ──publish(tag, bytes)──┐
//!  SchedulerProcessor ─dispatch(tag, bytes)┼──▶ Dispatcher ──▶ handler
//!  InboxGate / SagaOrchestrator ───────────┘
//! ```

mod log;
mod registry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;

pub use log::LogDispatcher;
pub use registry::HandlerRegistry;

/// Executes commands and publishes notifications identified by a type tag.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Execute a command and return its encoded response.
    async fn dispatch(&self, type_tag: &str, payload: &[u8]) -> Result<Vec<u8>, DispatchError>;

    /// Deliver a notification to every interested handler.
    async fn publish(&self, type_tag: &str, payload: &[u8]) -> Result<(), DispatchError>;
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    async fn dispatch(&self, type_tag: &str, payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
        (**self).dispatch(type_tag, payload).await
    }

    async fn publish(&self, type_tag: &str, payload: &[u8]) -> Result<(), DispatchError> {
        (**self).publish(type_tag, payload).await
    }
}
