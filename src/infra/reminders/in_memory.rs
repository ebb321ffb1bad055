// In-memory implementation of the reminder store.
//
// Backed by a DashMap so worker and caller tasks can hit it concurrently
// without an outer lock. Used by tests and handy for local development;
// follows the same contract as the SQLite implementation.

use crate::core::reminders::{Reminder, ReminderStore};
use crate::core::schedule::{StoreError, TimedStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

pub struct InMemoryReminderStore {
    rows: DashMap<i64, Reminder>,
}

impl InMemoryReminderStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    /// Total rows held, active or not.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl Default for InMemoryReminderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimedStore for InMemoryReminderStore {
    type Item = Reminder;

    async fn insert(&self, item: &Reminder) -> Result<(), StoreError> {
        match self.rows.entry(item.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(item.clone());
                Ok(())
            }
        }
    }

    async fn mark_inactive(&self, id: i64) -> Result<(), StoreError> {
        match self.rows.get_mut(&id) {
            Some(mut row) => {
                row.active = false;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn earliest_active_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Reminder>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.active && row.expires_at <= deadline)
            .min_by_key(|row| (row.expires_at, row.id))
            .map(|row| row.clone()))
    }
}

#[async_trait]
impl ReminderStore for InMemoryReminderStore {
    async fn list_active_for(&self, user_id: u64) -> Result<Vec<Reminder>, StoreError> {
        let mut reminders: Vec<Reminder> = self
            .rows
            .iter()
            .filter(|row| row.active && row.user_id == user_id)
            .map(|row| row.clone())
            .collect();
        reminders.sort_by_key(|r| (r.expires_at, r.id));
        Ok(reminders)
    }

    async fn cancel(&self, id: i64, user_id: u64) -> Result<bool, StoreError> {
        match self.rows.get_mut(&id) {
            Some(mut row) if row.active && row.user_id == user_id => {
                row.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_all_for(&self, user_id: u64) -> Result<u64, StoreError> {
        let mut count = 0;
        for mut row in self.rows.iter_mut() {
            if row.active && row.user_id == user_id {
                row.active = false;
                count += 1;
            }
        }
        Ok(count)
    }
}
