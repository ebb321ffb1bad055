// Reminder store implementations.

pub mod in_memory;
pub mod sqlite_store;

pub use in_memory::InMemoryReminderStore;
pub use sqlite_store::SqliteReminderStore;
