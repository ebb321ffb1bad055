// Clock abstraction for the deferred-event engine.
//
// The scheduler never reads system time directly; it goes through this
// trait so tests can drive virtual time deterministically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How a `sleep_until` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The deadline passed.
    Elapsed,
    /// The cancellation token fired first.
    Cancelled,
}

#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep until `deadline` or until `cancel` fires, whichever comes
    /// first. Deadlines already in the past return `Elapsed` immediately.
    async fn sleep_until(
        &self,
        deadline: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SleepOutcome;
}

/// Production clock backed by the tokio timer.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(
        &self,
        deadline: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SleepOutcome {
        let delta = match (deadline - Utc::now()).to_std() {
            Ok(delta) => delta,
            // Negative delta: the deadline already passed.
            Err(_) => return SleepOutcome::Elapsed,
        };
        tokio::select! {
            () = tokio::time::sleep(delta) => SleepOutcome::Elapsed,
            () = cancel.cancelled() => SleepOutcome::Cancelled,
        }
    }
}

/// Deterministic clock for tests. Virtual time only moves when `advance` or
/// `set` is called; sleepers re-check their deadline on every tick. The
/// tick channel is version-tracked, so a tick sent while a sleeper is
/// between its deadline check and its wait is still observed.
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    tick_tx: watch::Sender<()>,
    // Keeps the channel open; sleepers subscribe their own receivers.
    _tick_rx: watch::Receiver<()>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (tick_tx, tick_rx) = watch::channel(());
        Self {
            now: Mutex::new(start),
            tick_tx,
            _tick_rx: tick_rx,
        }
    }

    /// Move virtual time forward and wake every sleeper.
    pub fn advance(&self, by: chrono::Duration) {
        {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
        self.tick_tx.send_replace(());
    }

    /// Jump virtual time to an absolute instant.
    #[allow(dead_code)]
    pub fn set(&self, to: DateTime<Utc>) {
        {
            let mut now = self.now.lock().unwrap();
            *now = to;
        }
        self.tick_tx.send_replace(());
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep_until(
        &self,
        deadline: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SleepOutcome {
        let mut ticks = self.tick_tx.subscribe();
        loop {
            if self.now() >= deadline {
                return SleepOutcome::Elapsed;
            }
            tokio::select! {
                changed = ticks.changed() => {
                    if changed.is_err() {
                        // Clock dropped mid-sleep; nothing will ever move
                        // time again.
                        return SleepOutcome::Cancelled;
                    }
                }
                () = cancel.cancelled() => return SleepOutcome::Cancelled,
            }
        }
    }
}
