// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "schedule/schedule_engine.rs"]
pub mod schedule;

#[path = "reminders/mod.rs"]
pub mod reminders;

#[path = "modlog/mod.rs"]
pub mod modlog;
