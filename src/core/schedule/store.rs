// Storage port for timed items.
//
// Following the same pattern as the other stores: core defines the trait,
// infra provides SQLite and in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// An item with the same id already exists.
    #[error("an item with this id already exists")]
    Conflict,

    /// No item with the requested id.
    #[error("no such item")]
    NotFound,

    /// Database or connection fault. The operation may be retried.
    #[error("storage transport error: {0}")]
    Transport(String),
}

/// Anything the scheduler can wait on: an id, an optional deadline, and an
/// active flag held in the store.
pub trait TimedItem: Clone + Send + Sync + 'static {
    fn id(&self) -> i64;
    fn expires_at(&self) -> Option<DateTime<Utc>>;
}

/// Durable, deadline-ordered storage for one kind of timed item.
///
/// Implementations must make `insert` and `mark_inactive` atomic against
/// concurrent readers and give read-your-writes to the inserting task; the
/// scheduler's reload after a rewake depends on it.
#[async_trait]
pub trait TimedStore: Send + Sync + 'static {
    type Item: TimedItem;

    /// Append a new item. `Conflict` if the id is already taken.
    async fn insert(&self, item: &Self::Item) -> Result<(), StoreError>;

    /// Set `active = false`. `NotFound` if the id does not exist; succeeds
    /// as a no-op when the item is already inactive.
    async fn mark_inactive(&self, id: i64) -> Result<(), StoreError>;

    /// The active item with the smallest `expires_at` such that
    /// `expires_at <= deadline`. Ties break by ascending id.
    async fn earliest_active_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Self::Item>, StoreError>;
}
