// Reminder subsystem - user-created timed pings.

pub mod reminder_models;
pub mod reminder_service;

pub use reminder_models::{Reminder, ReminderEvent};
pub use reminder_service::{ReminderError, ReminderService, ReminderStore};
