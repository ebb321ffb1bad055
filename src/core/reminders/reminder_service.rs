// Reminder lifecycle - validation, persistence, scheduling.
//
// Sub-minute reminders never touch the store: the user just issued the
// command and the window is small, so losing one across a restart is an
// accepted trade. Everything else is persisted and handed to the scheduler.

use super::reminder_models::{Reminder, ReminderEvent};
use crate::core::schedule::{
    id_from_instant, regenerate_id, Clock, EventBus, Scheduler, ShortPath, StoreError, TimedStore,
    Tunables,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Longest reminder text accepted, after trimming.
pub const MAX_TEXT_LEN: usize = 2000;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("reminder text must not be empty")]
    EmptyText,

    #[error("reminder text is limited to {MAX_TEXT_LEN} characters")]
    TextTooLong,

    #[error("the reminder time must be in the future")]
    PastDeadline,

    #[error("reminders are limited to {0} days out")]
    TooFarOut(i64),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Storage port for reminders. Extends the scheduler-facing contract with
/// the owner-scoped operations the commands need.
#[async_trait]
pub trait ReminderStore: TimedStore<Item = Reminder> {
    /// Active reminders for a user, ordered by `expires_at` ascending.
    async fn list_active_for(&self, user_id: u64) -> Result<Vec<Reminder>, StoreError>;

    /// Deactivate one reminder if it is active and owned by `user_id`.
    /// Returns whether a row actually flipped.
    async fn cancel(&self, id: i64, user_id: u64) -> Result<bool, StoreError>;

    /// Deactivate every active reminder of a user. Returns how many flipped.
    async fn cancel_all_for(&self, user_id: u64) -> Result<u64, StoreError>;
}

pub struct ReminderService<S: ReminderStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<Scheduler<S, ReminderEvent>>,
    short_path: ShortPath<S, ReminderEvent>,
    tunables: Tunables,
}

impl<S: ReminderStore> ReminderService<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus<ReminderEvent>>,
        shutdown: CancellationToken,
        tunables: Tunables,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&bus),
            shutdown.clone(),
            tunables,
        ));
        let short_path = ShortPath::new(Arc::clone(&clock), bus, Arc::clone(&store), shutdown);
        Self {
            store,
            clock,
            scheduler,
            short_path,
            tunables,
        }
    }

    /// Start the background worker. Call once at startup, after the event
    /// bus subscribers are registered.
    pub fn spawn_worker(&self) -> tokio::task::JoinHandle<()> {
        self.scheduler.spawn()
    }

    pub async fn create(
        &self,
        user_id: u64,
        channel_id: u64,
        guild_id: Option<u64>,
        text: &str,
        when: DateTime<Utc>,
    ) -> Result<Reminder, ReminderError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ReminderError::EmptyText);
        }
        if text.chars().count() > MAX_TEXT_LEN {
            return Err(ReminderError::TextTooLong);
        }

        let now = self.clock.now();
        if when <= now {
            return Err(ReminderError::PastDeadline);
        }
        if when - now > self.tunables.max_reminder_horizon {
            return Err(ReminderError::TooFarOut(
                self.tunables.max_reminder_horizon.num_days(),
            ));
        }

        let reminder = Reminder {
            id: id_from_instant(now),
            created_at: now,
            expires_at: when,
            active: true,
            user_id,
            channel_id,
            guild_id,
            text: text.to_string(),
        };

        if when - now <= self.tunables.short_threshold {
            self.short_path.schedule(reminder.clone(), false);
            return Ok(reminder);
        }

        let reminder = self.insert_with_retry(reminder).await?;
        self.scheduler.note_inserted(reminder.expires_at);
        Ok(reminder)
    }

    /// Insert, retrying once with a fresh id if the generated one collides.
    async fn insert_with_retry(&self, mut reminder: Reminder) -> Result<Reminder, ReminderError> {
        match self.store.insert(&reminder).await {
            Ok(()) => Ok(reminder),
            Err(StoreError::Conflict) => {
                reminder.id = regenerate_id(self.clock.now());
                self.store.insert(&reminder).await?;
                Ok(reminder)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list(&self, user_id: u64) -> Result<Vec<Reminder>, ReminderError> {
        Ok(self.store.list_active_for(user_id).await?)
    }

    /// Cancel one reminder. `Ok(false)` when nothing was active under that
    /// id for this user - a benign no-op.
    pub async fn cancel(&self, user_id: u64, id: i64) -> Result<bool, ReminderError> {
        let cancelled = self.store.cancel(id, user_id).await?;
        if cancelled {
            self.scheduler.note_removed(id);
        }
        Ok(cancelled)
    }

    pub async fn cancel_all(&self, user_id: u64) -> Result<u64, ReminderError> {
        let count = self.store.cancel_all_for(user_id).await?;
        if count > 0 {
            self.scheduler.rewake();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schedule::{FakeClock, Subscriber};
    use crate::infra::reminders::InMemoryReminderStore;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct Recorder {
        fired: Mutex<Vec<Reminder>>,
    }

    #[async_trait]
    impl Subscriber<ReminderEvent> for Recorder {
        async fn handle(&self, event: &ReminderEvent) -> anyhow::Result<()> {
            let ReminderEvent::Fire(reminder) = event;
            self.fired.lock().unwrap().push(reminder.clone());
            Ok(())
        }
    }

    struct Harness {
        clock: Arc<FakeClock>,
        store: Arc<InMemoryReminderStore>,
        recorder: Arc<Recorder>,
        service: ReminderService<InMemoryReminderStore>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(FakeClock::new(start()));
            let store = Arc::new(InMemoryReminderStore::new());
            let bus = Arc::new(EventBus::new());
            let recorder = Arc::new(Recorder {
                fired: Mutex::new(Vec::new()),
            });
            bus.subscribe(recorder.clone());
            let clock_dyn: Arc<dyn Clock> = clock.clone();
            let service = ReminderService::new(
                Arc::clone(&store),
                clock_dyn,
                bus,
                CancellationToken::new(),
                Tunables::default(),
            );
            Self {
                clock,
                store,
                recorder,
                service,
            }
        }

        fn fired(&self) -> Vec<Reminder> {
            self.recorder.fired.lock().unwrap().clone()
        }
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        tokio::time::timeout(StdDuration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(StdDuration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn settle() {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_text() {
        let h = Harness::new();
        let when = start() + Duration::hours(1);

        let err = h.service.create(7, 42, None, "   ", when).await.unwrap_err();
        assert!(matches!(err, ReminderError::EmptyText));

        let long = "x".repeat(MAX_TEXT_LEN + 1);
        let err = h.service.create(7, 42, None, &long, when).await.unwrap_err();
        assert!(matches!(err, ReminderError::TextTooLong));
    }

    #[tokio::test]
    async fn rejects_past_and_too_distant_deadlines() {
        let h = Harness::new();

        let err = h
            .service
            .create(7, 42, None, "hi", start() - Duration::seconds(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReminderError::PastDeadline));

        let err = h
            .service
            .create(7, 42, None, "hi", start() + Duration::days(5 * 365 + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReminderError::TooFarOut(_)));
    }

    #[tokio::test]
    async fn short_reminder_skips_the_store_and_fires() {
        let h = Harness::new();
        h.service.spawn_worker();

        let reminder = h
            .service
            .create(7, 42, None, "drink water", start() + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(h.store.row_count(), 0);

        h.clock.advance(Duration::seconds(30));
        wait_for(|| h.fired().len() == 1).await;

        let fired = &h.fired()[0];
        assert_eq!(fired.id, reminder.id);
        assert_eq!(fired.text, "drink water");
        assert_eq!(fired.user_id, 7);
        assert_eq!(fired.channel_id, 42);
        assert_eq!(h.store.row_count(), 0);
    }

    #[tokio::test]
    async fn durable_reminder_fires_at_deadline_and_deactivates() {
        let h = Harness::new();
        h.service.spawn_worker();

        let reminder = h
            .service
            .create(7, 42, Some(1), "stretch", start() + Duration::seconds(3600))
            .await
            .unwrap();
        assert_eq!(h.store.row_count(), 1);
        settle().await;

        h.clock.advance(Duration::seconds(3599));
        settle().await;
        assert!(h.fired().is_empty());

        h.clock.advance(Duration::seconds(1));
        wait_for(|| h.fired().len() == 1).await;
        assert_eq!(h.fired()[0].id, reminder.id);
        assert!(h.service.list(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_short_reminder_fires_before_earlier_created_long_one() {
        let h = Harness::new();
        h.service.spawn_worker();

        let a = h
            .service
            .create(7, 42, None, "long", start() + Duration::seconds(3600))
            .await
            .unwrap();
        settle().await;

        h.clock.advance(Duration::seconds(1));
        let b = h
            .service
            .create(7, 42, None, "short", h.clock.now() + Duration::seconds(120))
            .await
            .unwrap();

        h.clock.advance(Duration::seconds(120));
        wait_for(|| h.fired().len() == 1).await;
        assert_eq!(h.fired()[0].id, b.id);

        h.clock.advance(Duration::seconds(3600));
        wait_for(|| h.fired().len() == 2).await;
        assert_eq!(h.fired()[1].id, a.id);
    }

    #[tokio::test]
    async fn list_returns_active_reminders_in_deadline_order() {
        let h = Harness::new();

        h.service
            .create(7, 42, None, "later", start() + Duration::hours(2))
            .await
            .unwrap();
        h.service
            .create(7, 42, None, "sooner", start() + Duration::hours(1))
            .await
            .unwrap();
        h.service
            .create(8, 42, None, "someone else", start() + Duration::hours(1))
            .await
            .unwrap();

        let listed = h.service.list(7).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].text, "sooner");
        assert_eq!(listed[1].text, "later");
    }

    #[tokio::test]
    async fn cancel_is_owner_scoped_and_idempotent() {
        let h = Harness::new();
        h.service.spawn_worker();

        let reminder = h
            .service
            .create(7, 42, None, "cancel me", start() + Duration::hours(1))
            .await
            .unwrap();
        settle().await;

        // Someone else cannot cancel it.
        assert!(!h.service.cancel(8, reminder.id).await.unwrap());

        assert!(h.service.cancel(7, reminder.id).await.unwrap());
        // Second call is a no-op.
        assert!(!h.service.cancel(7, reminder.id).await.unwrap());

        h.clock.advance(Duration::hours(2));
        settle().await;
        assert!(h.fired().is_empty());
    }

    #[tokio::test]
    async fn cancel_all_clears_every_active_reminder() {
        let h = Harness::new();
        h.service.spawn_worker();

        for text in ["one", "two", "three"] {
            h.service
                .create(7, 42, None, text, start() + Duration::hours(1))
                .await
                .unwrap();
        }
        settle().await;

        assert_eq!(h.service.cancel_all(7).await.unwrap(), 3);
        assert_eq!(h.service.cancel_all(7).await.unwrap(), 0);

        h.clock.advance(Duration::hours(2));
        settle().await;
        assert!(h.fired().is_empty());
    }

    #[tokio::test]
    async fn conflicting_id_is_retried_with_a_fresh_one() {
        let h = Harness::new();

        // Occupy the id the next create would derive from the clock.
        let stolen = Reminder {
            id: id_from_instant(h.clock.now()),
            created_at: start(),
            expires_at: start() + Duration::hours(1),
            active: true,
            user_id: 99,
            channel_id: 1,
            guild_id: None,
            text: "squatter".into(),
        };
        h.store.insert(&stolen).await.unwrap();

        let reminder = h
            .service
            .create(7, 42, None, "retry", start() + Duration::hours(1))
            .await
            .unwrap();
        assert_ne!(reminder.id, stolen.id);
        assert_eq!(h.store.row_count(), 2);
    }
}
