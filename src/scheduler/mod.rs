//! Deferred and recurring command dispatch.

mod in_memory;
mod item;
mod processor;
mod recurrence;
mod store;

pub use in_memory::InMemorySchedulerStore;
pub use item::ScheduledItem;
pub use processor::SchedulerProcessor;
pub use recurrence::RecurrenceRule;
pub use store::SchedulerStore;
