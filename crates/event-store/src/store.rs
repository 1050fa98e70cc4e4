use async_trait::async_trait;

use crate::{
    ChangeRecord, DailyAggregate, DayBucket, EventId, RawEvent, Result, SequenceNumber, Source,
};

/// Core trait for the keyed store holding raw events and daily aggregates.
///
/// Every successful write appends a [`ChangeRecord`] to the store's change
/// stream. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Writes a raw event unconditionally.
    ///
    /// No existence check is made; events are never updated, so a fresh
    /// event id always produces an `INSERT` change.
    async fn put_event(&self, event: RawEvent) -> Result<()>;

    /// Point read of a raw event.
    async fn get_event(&self, source: &Source, event_id: EventId) -> Result<Option<RawEvent>>;

    /// Point read of a daily aggregate.
    async fn get_aggregate(&self, source: &Source, day: DayBucket)
    -> Result<Option<DailyAggregate>>;

    /// Writes a daily aggregate, replacing any existing row for the same
    /// source and day.
    async fn put_aggregate(&self, aggregate: DailyAggregate) -> Result<()>;

    /// Atomically adds `by` to the view count of a daily aggregate, creating
    /// the row when absent. Returns the new count.
    async fn increment_aggregate(&self, source: &Source, day: DayBucket, by: u64) -> Result<u64>;
}

/// Read access to the change stream of a store.
#[async_trait]
pub trait ChangeStream: Send + Sync {
    /// Returns up to `limit` changes with a sequence number greater than
    /// `after`, oldest first.
    async fn read_changes(&self, after: SequenceNumber, limit: usize)
    -> Result<Vec<ChangeRecord>>;

    /// Returns the sequence number of the newest change, or the trim
    /// horizon when nothing was ever written.
    async fn latest_sequence(&self) -> Result<SequenceNumber>;

    /// Discards retained changes up to and including `through`. Returns the
    /// number of changes removed.
    ///
    /// Sequence numbers are never reused, so `latest_sequence` is unaffected.
    async fn trim_changes(&self, through: SequenceNumber) -> Result<usize>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Returns the view count for a source and day, zero when no aggregate
    /// exists yet.
    async fn view_count(&self, source: &Source, day: DayBucket) -> Result<u64> {
        Ok(self
            .get_aggregate(source, day)
            .await?
            .map(|aggregate| aggregate.view_count)
            .unwrap_or(0))
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}
