// Discord layer - commands, event handlers, and delivery subscribers.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "notify/notifiers.rs"]
pub mod notify;

#[path = "events.rs"]
pub mod events;

// Re-export command types for convenience
pub use commands::{Data, Error};
