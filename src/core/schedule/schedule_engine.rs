// The time-ordered deferred-event engine.
//
// Two subsystems (reminders and modlog cases) share this machinery: a
// single worker loop waiting on the next-due item in durable storage, a
// short-horizon bypass that skips the database for sub-minute deadlines,
// and a rewake protocol for inserts that preempt the item currently being
// waited on.
//
// NO Discord dependencies here - the surrounding application routes fired
// events wherever it wants through the event bus.

pub mod clock;
pub mod scheduler;
pub mod short_path;
pub mod sink;
pub mod store;

pub use clock::{Clock, FakeClock, SleepOutcome, SystemClock};
pub use scheduler::Scheduler;
pub use short_path::ShortPath;
pub use sink::{EventBus, Subscriber};
pub use store::{StoreError, TimedItem, TimedStore};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Timing knobs shared by the engine and its subsystems.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    /// Deadlines at most this far out bypass the store entirely.
    pub short_threshold: Duration,
    /// Maximum look-ahead. Items farther out stay dormant in the store
    /// until time moves them into range.
    pub horizon: Duration,
    /// Upper bound on how far out a reminder may be created.
    pub max_reminder_horizon: Duration,
    /// Cap for the worker restart backoff.
    pub backoff_max: std::time::Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            short_threshold: Duration::seconds(60),
            horizon: Duration::days(40),
            max_reminder_horizon: Duration::days(5 * 365),
            backoff_max: std::time::Duration::from_secs(30),
        }
    }
}

/// Derive an item id from its creation instant. Ids generated this way are
/// roughly monotonic, which keeps the `(expires_at, id)` tie-break stable
/// across runs.
pub fn id_from_instant(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// A replacement id after an insert conflict. Nudged by a random sub-second
/// offset so the retry cannot land on the same row again.
pub fn regenerate_id(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros() + rand::thread_rng().gen_range(1..1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_creation_order() {
        let earlier = Utc::now();
        let later = earlier + Duration::seconds(1);
        assert!(id_from_instant(earlier) < id_from_instant(later));
    }

    #[test]
    fn regenerated_id_differs() {
        let at = Utc::now();
        assert_ne!(id_from_instant(at), regenerate_id(at));
    }
}
