// Single-worker scheduler over a timed store.
//
// The worker repeatedly loads the earliest active item within the horizon,
// sleeps until its deadline, retires it, and publishes a completion event.
// Insertion paths signal the worker instead of touching its state directly:
// the worker never trusts its in-memory view and always reloads from the
// store after being woken.
//
// Shared state lives behind a mutex held only for short critical sections.
// The epoch counter closes the race between a store write and a query that
// was already in flight: writers bump it after their write returns, and the
// worker re-queries if it changed before the result could be published.

use super::clock::{Clock, SleepOutcome};
use super::sink::EventBus;
use super::store::{StoreError, TimedItem, TimedStore};
use super::Tunables;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Restart backoff starts here and doubles per consecutive failure.
const BACKOFF_BASE: StdDuration = StdDuration::from_secs(1);

/// The deadline currently being waited on.
#[derive(Debug, Clone, Copy)]
struct NextUp {
    at: DateTime<Utc>,
    id: i64,
}

struct Shared {
    /// Deadline of the item the worker is sleeping on, if any.
    next: Option<NextUp>,
    /// Cancelling this interrupts the worker's current sleep.
    sleep_cancel: CancellationToken,
    /// Bumped by every write path; lets the worker detect writes that raced
    /// its store query.
    epoch: u64,
}

pub struct Scheduler<S: TimedStore, E> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus<E>>,
    shared: Mutex<Shared>,
    have_data: Notify,
    shutdown: CancellationToken,
    made_progress: AtomicBool,
    tunables: Tunables,
}

impl<S, E> Scheduler<S, E>
where
    S: TimedStore,
    E: From<S::Item> + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus<E>>,
        shutdown: CancellationToken,
        tunables: Tunables,
    ) -> Self {
        let sleep_cancel = shutdown.child_token();
        Self {
            store,
            clock,
            bus,
            shared: Mutex::new(Shared {
                next: None,
                sleep_cancel,
                epoch: 0,
            }),
            have_data: Notify::new(),
            shutdown,
            made_progress: AtomicBool::new(false),
            tunables,
        }
    }

    /// Start the supervised worker. A transport error restarts the loop
    /// with exponential backoff; shutdown exits it cleanly without marking
    /// the in-flight item, so that item fires again after a restart.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = BACKOFF_BASE;
            loop {
                scheduler.made_progress.store(false, Ordering::Relaxed);
                match scheduler.run().await {
                    Ok(()) => break,
                    Err(err) => {
                        if scheduler.shutdown.is_cancelled() {
                            break;
                        }
                        if scheduler.made_progress.load(Ordering::Relaxed) {
                            backoff = BACKOFF_BASE;
                        }
                        tracing::error!(
                            error = %err,
                            backoff_secs = backoff.as_secs(),
                            "scheduler worker failed, restarting"
                        );
                        let wake_at = scheduler.clock.now()
                            + Duration::milliseconds(backoff.as_millis() as i64);
                        let outcome = scheduler
                            .clock
                            .sleep_until(wake_at, &scheduler.shutdown)
                            .await;
                        if outcome == SleepOutcome::Cancelled {
                            break;
                        }
                        backoff = (backoff * 2).min(scheduler.tunables.backoff_max);
                    }
                }
            }
            tracing::debug!("scheduler worker stopped");
        })
    }

    /// Insertion protocol, called after a successful store insert. Within
    /// the horizon this wakes a parked worker; if the new deadline preempts
    /// the one currently slept on, the sleep is cancelled so the worker
    /// reloads from the store.
    pub fn note_inserted(&self, expires_at: DateTime<Utc>) {
        if expires_at - self.clock.now() > self.tunables.horizon {
            // Beyond the look-ahead window; a parked worker picks it up
            // once time moves it into range.
            return;
        }
        {
            let mut shared = self.shared.lock().unwrap();
            shared.epoch += 1;
            if let Some(next) = shared.next {
                if expires_at < next.at {
                    shared.sleep_cancel.cancel();
                }
            }
        }
        self.have_data.notify_one();
    }

    /// Called after an item was deactivated out from under the worker
    /// (user cancellation, bulk expiry) so it does not fire a dead row.
    pub fn note_removed(&self, id: i64) {
        let mut shared = self.shared.lock().unwrap();
        shared.epoch += 1;
        if let Some(next) = shared.next {
            if next.id == id {
                shared.sleep_cancel.cancel();
            }
        }
    }

    /// Force the worker to re-query the store on its next step. Used by
    /// bulk cancellations that do not know individual ids.
    pub fn rewake(&self) {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.epoch += 1;
            shared.sleep_cancel.cancel();
        }
        self.have_data.notify_one();
    }

    /// The worker loop. `Ok` means shutdown; `Err` is a transport fault the
    /// supervisor handles.
    async fn run(&self) -> Result<(), StoreError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let epoch = self.shared.lock().unwrap().epoch;
            let deadline = self.clock.now() + self.tunables.horizon;
            let found = self.store.earliest_active_before(deadline).await?;

            let Some(item) = found else {
                if !self.park().await {
                    return Ok(());
                }
                continue;
            };

            let Some(expires_at) = item.expires_at() else {
                // The next-due query must never return deadline-less rows;
                // treat one as corrupt and retire it.
                tracing::error!(id = item.id(), "active item without expiry, retiring");
                self.store.mark_inactive(item.id()).await?;
                continue;
            };

            // Publish what we are about to wait on. If a writer bumped the
            // epoch while the query was in flight the result may already be
            // stale: re-query instead of sleeping on it.
            let sleep_token = {
                let mut shared = self.shared.lock().unwrap();
                if shared.epoch != epoch {
                    continue;
                }
                shared.next = Some(NextUp {
                    at: expires_at,
                    id: item.id(),
                });
                shared.sleep_cancel = self.shutdown.child_token();
                shared.sleep_cancel.clone()
            };

            if expires_at > self.clock.now() {
                let outcome = self.clock.sleep_until(expires_at, &sleep_token).await;
                if outcome == SleepOutcome::Cancelled {
                    self.clear_next();
                    if self.shutdown.is_cancelled() {
                        return Ok(());
                    }
                    // Rewake: an earlier item arrived or this one was
                    // cancelled. Reload from the store.
                    continue;
                }
            }

            self.clear_next();

            if self.shutdown.is_cancelled() {
                // Exit without marking: the item fires again after restart.
                return Ok(());
            }

            // Mark before emit, so a subscriber inspecting the store always
            // sees the item inactive.
            self.store.mark_inactive(item.id()).await?;
            self.made_progress.store(true, Ordering::Relaxed);
            tracing::debug!(id = item.id(), "timed item fired");
            self.bus.emit(E::from(item)).await;
        }
    }

    /// Park until an insert signal arrives or the horizon elapses (a far
    /// item may have come into range). Returns false on shutdown.
    async fn park(&self) -> bool {
        self.clear_next();
        let wake_at = self.clock.now() + self.tunables.horizon;
        tokio::select! {
            () = self.have_data.notified() => true,
            outcome = self.clock.sleep_until(wake_at, &self.shutdown) => {
                outcome == SleepOutcome::Elapsed
            }
        }
    }

    fn clear_next(&self) {
        self.shared.lock().unwrap().next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schedule::clock::FakeClock;
    use crate::core::schedule::sink::Subscriber;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone)]
    struct TestItem {
        id: i64,
        expires_at: Option<DateTime<Utc>>,
    }

    impl TimedItem for TestItem {
        fn id(&self) -> i64 {
            self.id
        }
        fn expires_at(&self) -> Option<DateTime<Utc>> {
            self.expires_at
        }
    }

    /// In-memory store with injectable mark failures.
    struct TestStore {
        rows: Mutex<Vec<(TestItem, bool)>>,
        failing_marks: AtomicUsize,
    }

    impl TestStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                failing_marks: AtomicUsize::new(0),
            }
        }

        fn is_active(&self, id: i64) -> bool {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .any(|(item, active)| item.id == id && *active)
        }

        fn seed(&self, item: TestItem) {
            self.rows.lock().unwrap().push((item, true));
        }
    }

    #[async_trait]
    impl TimedStore for TestStore {
        type Item = TestItem;

        async fn insert(&self, item: &TestItem) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|(existing, _)| existing.id == item.id) {
                return Err(StoreError::Conflict);
            }
            rows.push((item.clone(), true));
            Ok(())
        }

        async fn mark_inactive(&self, id: i64) -> Result<(), StoreError> {
            if self
                .failing_marks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Transport("injected fault".into()));
            }
            let mut rows = self.rows.lock().unwrap();
            match rows.iter_mut().find(|(item, _)| item.id == id) {
                Some((_, active)) => {
                    *active = false;
                    Ok(())
                }
                None => Err(StoreError::NotFound),
            }
        }

        async fn earliest_active_before(
            &self,
            deadline: DateTime<Utc>,
        ) -> Result<Option<TestItem>, StoreError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|(item, active)| {
                    *active && item.expires_at.map_or(false, |at| at <= deadline)
                })
                .min_by_key(|(item, _)| (item.expires_at, item.id))
                .map(|(item, _)| item.clone()))
        }
    }

    /// Records fired ids together with whether the store already saw the
    /// item as inactive at emit time.
    struct Recorder {
        store: Arc<TestStore>,
        fired: Mutex<Vec<(i64, bool)>>,
    }

    #[async_trait]
    impl Subscriber<TestItem> for Recorder {
        async fn handle(&self, event: &TestItem) -> anyhow::Result<()> {
            let inactive = !self.store.is_active(event.id);
            self.fired.lock().unwrap().push((event.id, inactive));
            Ok(())
        }
    }

    struct Harness {
        clock: Arc<FakeClock>,
        store: Arc<TestStore>,
        recorder: Arc<Recorder>,
        scheduler: Arc<Scheduler<TestStore, TestItem>>,
        shutdown: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(FakeClock::new(start()));
            let store = Arc::new(TestStore::new());
            let bus = Arc::new(EventBus::new());
            let recorder = Arc::new(Recorder {
                store: Arc::clone(&store),
                fired: Mutex::new(Vec::new()),
            });
            bus.subscribe(recorder.clone());
            let shutdown = CancellationToken::new();
            let clock_for_scheduler: Arc<dyn Clock> = clock.clone();
            let scheduler = Arc::new(Scheduler::new(
                Arc::clone(&store),
                clock_for_scheduler,
                bus,
                shutdown.clone(),
                Tunables::default(),
            ));
            Self {
                clock,
                store,
                recorder,
                scheduler,
                shutdown,
            }
        }

        fn fired_ids(&self) -> Vec<i64> {
            self.recorder
                .fired
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _)| *id)
                .collect()
        }

        async fn insert(&self, id: i64, expires_at: DateTime<Utc>) {
            let item = TestItem {
                id,
                expires_at: Some(expires_at),
            };
            self.store.insert(&item).await.unwrap();
            self.scheduler.note_inserted(expires_at);
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn wait_for(cond: impl Fn() -> bool, secs: u64) {
        tokio::time::timeout(StdDuration::from_secs(secs), async {
            while !cond() {
                tokio::time::sleep(StdDuration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Advance virtual time one second at a time until `cond` holds. Lets
    /// the worker interleave between ticks.
    async fn advance_until(clock: &FakeClock, cond: impl Fn() -> bool) {
        for _ in 0..600 {
            if cond() {
                return;
            }
            clock.advance(Duration::seconds(1));
            tokio::time::sleep(StdDuration::from_millis(2)).await;
        }
        panic!("condition not reached after advancing");
    }

    /// Give the spawned worker a moment to reach its sleep.
    async fn settle() {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn fires_in_deadline_order() {
        let h = Harness::new();
        h.scheduler.spawn();

        // Shuffled insertion order, distinct deadlines.
        h.insert(3, start() + Duration::seconds(300)).await;
        h.insert(1, start() + Duration::seconds(100)).await;
        h.insert(2, start() + Duration::seconds(200)).await;

        settle().await;
        h.clock.advance(Duration::seconds(400));
        wait_for(|| h.fired_ids().len() == 3, 5).await;

        assert_eq!(h.fired_ids(), vec![1, 2, 3]);
        // Every emit happened after the mark was visible in the store.
        assert!(h
            .recorder
            .fired
            .lock()
            .unwrap()
            .iter()
            .all(|(_, inactive)| *inactive));
    }

    #[tokio::test]
    async fn ties_break_by_ascending_id() {
        let h = Harness::new();

        // Same deadline, ids seeded in shuffled order.
        let at = start() + Duration::seconds(60);
        for id in [30, 10, 20] {
            h.store.seed(TestItem {
                id,
                expires_at: Some(at),
            });
        }

        h.scheduler.spawn();
        h.clock.advance(Duration::seconds(120));
        wait_for(|| h.fired_ids().len() == 3, 5).await;

        assert_eq!(h.fired_ids(), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn earlier_insert_preempts_current_sleep() {
        let h = Harness::new();
        h.scheduler.spawn();

        h.insert(1, start() + Duration::seconds(3600)).await;
        settle().await;

        // Preempts the hour-long sleep.
        h.insert(2, start() + Duration::seconds(120)).await;
        settle().await;

        h.clock.advance(Duration::seconds(120));
        wait_for(|| h.fired_ids().len() == 1, 5).await;
        assert_eq!(h.fired_ids(), vec![2]);
        assert!(h.store.is_active(1));

        h.clock.advance(Duration::seconds(3480));
        wait_for(|| h.fired_ids().len() == 2, 5).await;
        assert_eq!(h.fired_ids(), vec![2, 1]);
    }

    #[tokio::test]
    async fn items_beyond_horizon_stay_dormant_until_in_range() {
        let h = Harness::new();
        h.scheduler.spawn();
        settle().await;

        let horizon = Tunables::default().horizon;
        h.insert(1, start() + horizon + Duration::seconds(1)).await;

        h.clock.advance(Duration::seconds(10));
        settle().await;
        assert!(h.fired_ids().is_empty());
        assert!(h.store.is_active(1));

        // Once time moves the item into range the parked worker reloads it.
        h.clock.advance(horizon);
        wait_for(|| h.fired_ids() == vec![1], 5).await;
    }

    #[tokio::test]
    async fn past_due_item_fires_immediately_on_startup() {
        let h = Harness::new();
        // The row predates this process; the scheduler starts well after
        // the deadline.
        h.store.seed(TestItem {
            id: 7,
            expires_at: Some(start() - Duration::seconds(60)),
        });

        h.scheduler.spawn();
        wait_for(|| h.fired_ids() == vec![7], 5).await;
        assert!(!h.store.is_active(7));
    }

    #[tokio::test]
    async fn refires_after_mark_failure() {
        let h = Harness::new();
        h.store.failing_marks.store(1, Ordering::SeqCst);
        h.scheduler.spawn();

        h.insert(1, start() + Duration::seconds(10)).await;
        settle().await;

        // First attempt dies on the injected fault before emitting; the
        // supervisor restarts the loop and the item fires on the retry.
        advance_until(&h.clock, || h.fired_ids() == vec![1]).await;
        assert!(!h.store.is_active(1));
    }

    #[tokio::test]
    async fn cancelled_item_never_fires() {
        let h = Harness::new();
        h.scheduler.spawn();

        h.insert(1, start() + Duration::seconds(600)).await;
        settle().await;

        // Cancellation path: deactivate in the store, then signal.
        h.store.mark_inactive(1).await.unwrap();
        h.scheduler.note_removed(1);
        settle().await;

        h.clock.advance(Duration::seconds(1200));
        settle().await;
        assert!(h.fired_ids().is_empty());

        // The worker is parked again and still serves later inserts.
        let now = h.clock.now();
        h.insert(2, now + Duration::seconds(30)).await;
        h.clock.advance(Duration::seconds(60));
        wait_for(|| h.fired_ids() == vec![2], 5).await;
    }

    #[tokio::test]
    async fn shutdown_leaves_in_flight_item_active() {
        let h = Harness::new();
        let worker = h.scheduler.spawn();

        h.insert(1, start() + Duration::seconds(300)).await;
        settle().await;

        h.shutdown.cancel();
        worker.await.unwrap();

        assert!(h.fired_ids().is_empty());
        assert!(h.store.is_active(1));
    }

    #[tokio::test]
    async fn parked_worker_wakes_on_first_insert() {
        let h = Harness::new();
        h.scheduler.spawn();
        settle().await;

        h.insert(1, start() + Duration::seconds(10)).await;
        h.clock.advance(Duration::seconds(10));
        wait_for(|| h.fired_ids() == vec![1], 5).await;
    }

    #[tokio::test]
    async fn soak_thousand_items_fire_in_sorted_order() {
        let h = Harness::new();
        let horizon_secs = Tunables::default().horizon.num_seconds();
        let mut rng = StdRng::seed_from_u64(42);

        let mut expected: Vec<(DateTime<Utc>, i64)> = Vec::new();
        for id in 1..=1000 {
            let at = start() + Duration::seconds(rng.gen_range(1..horizon_secs));
            h.store.seed(TestItem {
                id,
                expires_at: Some(at),
            });
            expected.push((at, id));
        }
        expected.sort();

        h.scheduler.spawn();
        h.clock.advance(Duration::seconds(horizon_secs));
        wait_for(|| h.fired_ids().len() == 1000, 60).await;

        let expected_ids: Vec<i64> = expected.into_iter().map(|(_, id)| id).collect();
        assert_eq!(h.fired_ids(), expected_ids);
    }
}
