// Reminder domain models.
//
// Pure domain types with no Discord dependencies. The Discord layer turns
// fired reminders into channel pings.

use crate::core::schedule::TimedItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-created reminder. `active` flips to false exactly once, when the
/// reminder fires or is cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    /// The user who asked to be reminded.
    pub user_id: u64,
    /// Where the reminder was created and where the ping goes.
    pub channel_id: u64,
    /// Absent for reminders created in DMs.
    pub guild_id: Option<u64>,
    pub text: String,
}

impl TimedItem for Reminder {
    fn id(&self) -> i64 {
        self.id
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.expires_at)
    }
}

/// Events published by the reminder subsystem.
#[derive(Debug, Clone)]
pub enum ReminderEvent {
    /// The reminder's deadline elapsed.
    Fire(Reminder),
}

// A fire from the scheduler is the only thing a reminder's timer can
// produce.
impl From<Reminder> for ReminderEvent {
    fn from(reminder: Reminder) -> Self {
        ReminderEvent::Fire(reminder)
    }
}
