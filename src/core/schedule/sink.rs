// Local publish/subscribe for completion events.
//
// The engine does not know who consumes fired items; the application
// registers subscribers at startup and the bus delivers on the emitting
// task. A failing subscriber is logged and skipped so it can never kill a
// scheduler worker.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

#[async_trait]
pub trait Subscriber<E>: Send + Sync {
    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

pub struct EventBus<E> {
    subscribers: RwLock<Vec<Arc<dyn Subscriber<E>>>>,
}

impl<E: Send + Sync> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<E>>) {
        self.subscribers.write().unwrap().push(subscriber);
    }

    /// Deliver `event` to every subscriber in registration order.
    pub async fn emit(&self, event: E) {
        // Snapshot under the read lock, deliver outside it.
        let subscribers: Vec<_> = self.subscribers.read().unwrap().clone();
        for subscriber in subscribers {
            if let Err(err) = subscriber.handle(&event).await {
                tracing::warn!(error = %err, "event subscriber failed");
            }
        }
    }
}

impl<E: Send + Sync> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Subscriber<u32> for Counting {
        async fn handle(&self, _event: &u32) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Subscriber<u32> for Failing {
        async fn handle(&self, _event: &u32) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let first = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let second = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        bus.emit(7).await;

        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let counting = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(counting.clone());

        bus.emit(7).await;

        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
    }
}
