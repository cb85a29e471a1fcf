//! Idempotent inbox.
//!
//! [`InboxGate`] runs inline around request handling and guarantees that a
//! repeated message id never re-executes the handler once it has succeeded.
//! [`InboxSweeper`] removes records after their retention period.

mod gate;
mod in_memory;
mod item;
mod store;
mod sweeper;

pub use gate::InboxGate;
pub use in_memory::InMemoryInboxStore;
pub use item::InboxItem;
pub use store::InboxStore;
pub use sweeper::InboxSweeper;
