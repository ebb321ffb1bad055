// In-process bypass for deadlines within the short threshold.
//
// Items land here instead of the scheduler when their deadline is at most
// `Tunables::short_threshold` away. Each one gets its own fire-and-forget
// timer task; state is process-local and lost on restart, which is the
// accepted trade for skipping a database round-trip on sub-minute waits.

use super::clock::{Clock, SleepOutcome};
use super::sink::EventBus;
use super::store::{TimedItem, TimedStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ShortPath<S: TimedStore, E> {
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus<E>>,
    store: Arc<S>,
    shutdown: CancellationToken,
}

impl<S, E> ShortPath<S, E>
where
    S: TimedStore,
    E: From<S::Item> + Send + Sync + 'static,
{
    pub fn new(
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus<E>>,
        store: Arc<S>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            clock,
            bus,
            store,
            shutdown,
        }
    }

    /// Put `item` on an in-memory timer. `persisted` says whether the item
    /// also has a store row that must be retired before the event goes out
    /// (short-delta modlog cases do; short-path reminders are never
    /// written).
    pub fn schedule(&self, item: S::Item, persisted: bool) {
        let Some(expires_at) = item.expires_at() else {
            tracing::error!(id = item.id(), "short-path item without a deadline, dropping");
            return;
        };

        let clock = Arc::clone(&self.clock);
        let bus = Arc::clone(&self.bus);
        let store = Arc::clone(&self.store);
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            if clock.sleep_until(expires_at, &cancel).await == SleepOutcome::Cancelled {
                return;
            }
            if persisted {
                // Mark first so every subscriber that looks at the store
                // already sees the item inactive.
                if let Err(err) = store.mark_inactive(item.id()).await {
                    tracing::warn!(
                        id = item.id(),
                        error = %err,
                        "failed to retire short-path item, emitting anyway"
                    );
                }
            }
            bus.emit(E::from(item)).await;
        });
    }
}
