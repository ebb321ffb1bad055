// Discord commands module.
// Each feature gets its own command file.

pub mod moderation;
pub mod modlog;
pub mod remind;

use crate::core::modlog::ModlogService;
use crate::core::reminders::ReminderService;
use crate::infra::modlog::SqliteCaseStore;
use crate::infra::reminders::SqliteReminderStore;
use std::sync::Arc;

/// Type alias for our bot's context.
/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Concrete service types as wired in main.
pub type Reminders = ReminderService<SqliteReminderStore>;
pub type Modlog = ModlogService<SqliteCaseStore, SqliteCaseStore>;

/// Data that's shared across all commands.
pub struct Data {
    pub reminders: Arc<Reminders>,
    pub modlog: Arc<Modlog>,
}
