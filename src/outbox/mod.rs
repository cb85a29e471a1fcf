//! Transactional outbox.
//!
//! Application code adds an [`OutboxItem`] in the same unit of work as the
//! business change. An [`OutboxProcessor`] later claims pending items and
//! publishes them, giving at-least-once delivery.

mod in_memory;
mod item;
mod processor;
mod store;

pub use in_memory::InMemoryOutboxStore;
pub use item::OutboxItem;
pub use processor::OutboxProcessor;
pub use store::OutboxStore;
