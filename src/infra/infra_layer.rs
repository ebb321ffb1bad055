// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "reminders/reminder_stores.rs"]
pub mod reminders;

#[path = "modlog/modlog_stores.rs"]
pub mod modlog;
