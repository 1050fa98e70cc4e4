use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    ChangeKind, ChangeRecord, DailyAggregate, DayBucket, EventId, RawEvent, Result,
    SequenceNumber, Source, StoreKey, StoredItem,
    store::{ChangeStream, EventStore},
};

#[derive(Default)]
struct State {
    rows: HashMap<StoreKey, StoredItem>,
    /// Retained changes, oldest first and gap-free.
    changes: VecDeque<ChangeRecord>,
    /// Sequence number of the newest change ever appended.
    last_sequence: u64,
}

impl State {
    /// Writes a row and records the matching change.
    fn write(&mut self, item: StoredItem) {
        let kind = match self.rows.insert(item.key(), item.clone()) {
            None => ChangeKind::Insert,
            Some(_) => ChangeKind::Modify,
        };
        self.last_sequence += 1;
        let sequence_number = SequenceNumber::new(self.last_sequence);
        self.changes
            .push_back(ChangeRecord::new(sequence_number, kind, &item));
        metrics::counter!("event_store_changes_appended_total", "kind" => kind.as_str())
            .increment(1);
    }

    /// Index of the first retained change newer than `after`.
    fn index_after(&self, after: SequenceNumber) -> usize {
        let before_first = self.last_sequence - self.changes.len() as u64;
        usize::try_from(after.as_u64().saturating_sub(before_first))
            .unwrap_or(usize::MAX)
            .min(self.changes.len())
    }
}

/// In-memory store for tests and local runs.
///
/// Both row shapes live in one map keyed by [`StoreKey`]. Each call takes
/// the lock separately, so a read followed by a write is not atomic, the
/// same as against a remote store.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of raw events stored.
    pub async fn event_count(&self) -> usize {
        self.state
            .read()
            .await
            .rows
            .values()
            .filter(|item| matches!(item, StoredItem::Event(_)))
            .count()
    }

    /// Returns the number of daily aggregates stored.
    pub async fn aggregate_count(&self) -> usize {
        self.state
            .read()
            .await
            .rows
            .values()
            .filter(|item| matches!(item, StoredItem::Aggregate(_)))
            .count()
    }

    /// Returns all raw events of a source.
    pub async fn events_for_source(&self, source: &Source) -> Vec<RawEvent> {
        self.state
            .read()
            .await
            .rows
            .values()
            .filter_map(|item| match item {
                StoredItem::Event(event) if &event.source == source => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of changes still retained in the change log.
    pub async fn retained_changes(&self) -> usize {
        self.state.read().await.changes.len()
    }

    /// Clears all rows and the change log.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.rows.clear();
        state.changes.clear();
        state.last_sequence = 0;
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn put_event(&self, event: RawEvent) -> Result<()> {
        self.state.write().await.write(StoredItem::Event(event));
        Ok(())
    }

    async fn get_event(&self, source: &Source, event_id: EventId) -> Result<Option<RawEvent>> {
        let key = StoreKey::Event {
            source: source.clone(),
            event_id,
        };
        let state = self.state.read().await;
        Ok(match state.rows.get(&key) {
            Some(StoredItem::Event(event)) => Some(event.clone()),
            _ => None,
        })
    }

    async fn get_aggregate(
        &self,
        source: &Source,
        day: DayBucket,
    ) -> Result<Option<DailyAggregate>> {
        let key = StoreKey::Aggregate {
            source: source.clone(),
            day,
        };
        let state = self.state.read().await;
        Ok(match state.rows.get(&key) {
            Some(StoredItem::Aggregate(aggregate)) => Some(aggregate.clone()),
            _ => None,
        })
    }

    async fn put_aggregate(&self, aggregate: DailyAggregate) -> Result<()> {
        self.state
            .write()
            .await
            .write(StoredItem::Aggregate(aggregate));
        Ok(())
    }

    async fn increment_aggregate(&self, source: &Source, day: DayBucket, by: u64) -> Result<u64> {
        let key = StoreKey::Aggregate {
            source: source.clone(),
            day,
        };

        // Read and write under one write lock.
        let mut state = self.state.write().await;
        let current = match state.rows.get(&key) {
            Some(StoredItem::Aggregate(aggregate)) => aggregate.view_count,
            _ => 0,
        };
        let view_count = current + by;
        state.write(StoredItem::Aggregate(DailyAggregate::new(
            source.clone(),
            day,
            view_count,
        )));
        Ok(view_count)
    }
}

#[async_trait]
impl ChangeStream for InMemoryEventStore {
    async fn read_changes(
        &self,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>> {
        let state = self.state.read().await;
        Ok(state
            .changes
            .range(state.index_after(after)..)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_sequence(&self) -> Result<SequenceNumber> {
        Ok(SequenceNumber::new(self.state.read().await.last_sequence))
    }

    async fn trim_changes(&self, through: SequenceNumber) -> Result<usize> {
        let mut state = self.state.write().await;
        let count = state.index_after(through);
        state.changes.drain(..count);
        Ok(count)
    }
}
