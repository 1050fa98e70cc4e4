//! Folding change-stream batches into daily aggregates.

use std::sync::Arc;

use common::{DayBucket, Source};
use event_store::{ChangeRecord, EventStore, StoredItem};
use futures_util::future::join_all;

use crate::counter::CounterStrategy;
use crate::dedup::RecentEventIds;
use crate::{AggregationError, RecordFailure, Result};

/// What happened to a single change.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Counted {
        source: Source,
        day: DayBucket,
        view_count: u64,
    },
    /// Not an insert.
    Ignored,
    /// An insert of an aggregate row, produced by this consumer.
    OwnWrite,
    /// Already counted within the dedup window.
    Duplicate,
}

/// Per-batch tally of a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Events added to a counter.
    pub counted: usize,
    /// Changes that were not inserts of raw events.
    pub skipped: usize,
    /// Redelivered events dropped by the dedup window.
    pub duplicates: usize,
}

/// Consumes batches of change notifications and bumps the daily counter of
/// every inserted raw event.
///
/// Records of a batch are applied concurrently and independently. The
/// batch succeeds only if every record does; otherwise the whole batch is
/// reported as failed and the caller decides whether to redeliver it.
/// Records that succeeded before the failure stay counted, so redelivery
/// counts them again unless a dedup window is configured.
pub struct AggregationConsumer<S: EventStore> {
    store: S,
    strategy: Arc<dyn CounterStrategy>,
    dedup: Option<RecentEventIds>,
}

impl<S: EventStore> AggregationConsumer<S> {
    /// Creates a consumer bumping counters in `store` with `strategy`.
    pub fn new(store: S, strategy: Arc<dyn CounterStrategy>) -> Self {
        if !strategy.prevents_lost_updates() {
            tracing::warn!(
                strategy = strategy.name(),
                "counter strategy can lose increments under overlapping batches"
            );
        }
        Self {
            store,
            strategy,
            dedup: None,
        }
    }

    /// Drops events whose id was counted within the last `window` events.
    pub fn with_dedup(mut self, window: RecentEventIds) -> Self {
        self.dedup = Some(window);
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the name of the counter strategy in use.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Applies a batch of changes and waits for every record to finish.
    #[tracing::instrument(skip(self, batch), fields(batch_size = batch.len(), strategy = self.strategy.name()))]
    pub async fn process_batch(&self, batch: &[ChangeRecord]) -> Result<BatchSummary> {
        let results = join_all(batch.iter().map(|record| self.process_record(record))).await;

        let mut summary = BatchSummary::default();
        let mut failures = Vec::new();

        for (record, result) in batch.iter().zip(results) {
            match result {
                Ok(Outcome::Counted {
                    source,
                    day,
                    view_count,
                }) => {
                    tracing::debug!(%source, %day, view_count, "counter updated");
                    summary.counted += 1;
                }
                Ok(Outcome::Ignored | Outcome::OwnWrite) => summary.skipped += 1,
                Ok(Outcome::Duplicate) => summary.duplicates += 1,
                Err(err) => failures.push(RecordFailure {
                    sequence_number: record.sequence_number,
                    message: err.to_string(),
                }),
            }
        }

        metrics::counter!("aggregation_records_processed_total").increment(summary.counted as u64);
        metrics::counter!("aggregation_duplicates_skipped_total")
            .increment(summary.duplicates as u64);

        if !failures.is_empty() {
            metrics::counter!("aggregation_batches_failed_total").increment(1);
            for failure in &failures {
                tracing::warn!(%failure, "record failed");
            }
            return Err(AggregationError::BatchFailed {
                total: batch.len(),
                failures,
            });
        }

        Ok(summary)
    }

    async fn process_record(&self, record: &ChangeRecord) -> Result<Outcome> {
        if !record.is_insert() {
            return Ok(Outcome::Ignored);
        }

        let image = record
            .new_image
            .as_ref()
            .ok_or(AggregationError::MissingImage(record.sequence_number))?;

        let event = match image.decode()? {
            StoredItem::Event(event) => event,
            StoredItem::Aggregate(_) => return Ok(Outcome::OwnWrite),
        };

        if let Some(dedup) = &self.dedup
            && !dedup.claim(event.event_id).await
        {
            tracing::debug!(event_id = %event.event_id, "skipping redelivered event");
            return Ok(Outcome::Duplicate);
        }

        let day = event.day();
        match self.strategy.increment(&self.store, &event.source, day).await {
            Ok(view_count) => Ok(Outcome::Counted {
                source: event.source,
                day,
                view_count,
            }),
            Err(err) => {
                if let Some(dedup) = &self.dedup {
                    dedup.release(event.event_id).await;
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{AtomicIncrement, ReadModifyWrite};
    use chrono::{TimeZone, Utc};
    use event_store::{
        ChangeKind, DailyAggregate, EventStoreExt, InMemoryEventStore, RawEvent, RowImage,
        SequenceNumber,
    };

    fn source() -> Source {
        Source::new("S").unwrap()
    }

    fn day(value: &str) -> DayBucket {
        DayBucket::parse(value).unwrap()
    }

    fn insert(seq: u64, event: &RawEvent) -> ChangeRecord {
        ChangeRecord::new(
            SequenceNumber::new(seq),
            ChangeKind::Insert,
            &StoredItem::Event(event.clone()),
        )
    }

    fn event_at(hour: u32) -> RawEvent {
        RawEvent::at(
            source(),
            "embed_123",
            Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
        )
    }

    fn consumer(store: InMemoryEventStore) -> AggregationConsumer<InMemoryEventStore> {
        AggregationConsumer::new(store, Arc::new(ReadModifyWrite))
    }

    #[tokio::test]
    async fn test_first_event_creates_aggregate_with_count_one() {
        let store = InMemoryEventStore::new();
        let consumer = consumer(store.clone());

        let summary = consumer.process_batch(&[insert(1, &event_at(12))]).await.unwrap();

        assert_eq!(summary.counted, 1);
        let aggregate = store
            .get_aggregate(&source(), day("2024-01-01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(aggregate.view_count, 1);
    }

    #[tokio::test]
    async fn test_existing_aggregate_is_incremented() {
        let store = InMemoryEventStore::new();
        store
            .put_aggregate(DailyAggregate::new(source(), day("2024-01-01"), 4))
            .await
            .unwrap();
        let consumer = consumer(store.clone());

        consumer.process_batch(&[insert(1, &event_at(12))]).await.unwrap();

        assert_eq!(
            store.view_count(&source(), day("2024-01-01")).await.unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_non_insert_changes_are_ignored() {
        let store = InMemoryEventStore::new();
        let consumer = consumer(store.clone());
        let mut modify = insert(1, &event_at(12));
        modify.kind = ChangeKind::Modify;
        let remove = ChangeRecord {
            sequence_number: SequenceNumber::new(2),
            kind: ChangeKind::Remove,
            new_image: None,
        };

        let summary = consumer.process_batch(&[modify, remove]).await.unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(store.aggregate_count().await, 0);
    }

    #[tokio::test]
    async fn test_aggregate_row_inserts_are_skipped() {
        let store = InMemoryEventStore::new();
        let consumer = consumer(store.clone());
        let own = ChangeRecord::new(
            SequenceNumber::new(1),
            ChangeKind::Insert,
            &StoredItem::Aggregate(DailyAggregate::new(source(), day("2024-01-01"), 1)),
        );

        let summary = consumer.process_batch(&[own]).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(store.aggregate_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_timestamp_fails_the_whole_batch() {
        let store = InMemoryEventStore::new();
        let consumer = consumer(store.clone());
        let good = insert(1, &event_at(12));
        let mut bad = insert(2, &event_at(13));
        bad.new_image = Some(RowImage {
            timestamp: Some("not a date".to_string()),
            ..bad.new_image.unwrap()
        });

        let err = consumer.process_batch(&[good, bad]).await.unwrap_err();

        let AggregationError::BatchFailed { total, failures } = err else {
            panic!("expected a batch failure");
        };
        assert_eq!(total, 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].sequence_number, SequenceNumber::new(2));
        // The good record was still applied.
        assert_eq!(
            store.view_count(&source(), day("2024-01-01")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_insert_without_image_fails() {
        let consumer = consumer(InMemoryEventStore::new());
        let record = ChangeRecord {
            sequence_number: SequenceNumber::new(1),
            kind: ChangeKind::Insert,
            new_image: None,
        };

        assert!(consumer.process_batch(&[record]).await.is_err());
    }

    #[tokio::test]
    async fn test_redelivery_counts_twice_without_dedup() {
        let store = InMemoryEventStore::new();
        let consumer = AggregationConsumer::new(store.clone(), Arc::new(AtomicIncrement));
        let record = insert(1, &event_at(12));

        consumer.process_batch(&[record.clone()]).await.unwrap();
        consumer.process_batch(&[record]).await.unwrap();

        assert_eq!(
            store.view_count(&source(), day("2024-01-01")).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_redelivery_counts_once_with_dedup() {
        let store = InMemoryEventStore::new();
        let consumer = AggregationConsumer::new(store.clone(), Arc::new(AtomicIncrement))
            .with_dedup(RecentEventIds::new(100));
        let record = insert(1, &event_at(12));

        consumer.process_batch(&[record.clone()]).await.unwrap();
        let summary = consumer.process_batch(&[record]).await.unwrap();

        assert_eq!(summary.duplicates, 1);
        assert_eq!(
            store.view_count(&source(), day("2024-01-01")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_events_on_different_days_use_different_buckets() {
        let store = InMemoryEventStore::new();
        let consumer = AggregationConsumer::new(store.clone(), Arc::new(AtomicIncrement));
        let late = RawEvent::at(
            source(),
            "embed_123",
            Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap(),
        );
        let early = RawEvent::at(
            source(),
            "embed_123",
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        );

        consumer
            .process_batch(&[insert(1, &late), insert(2, &early)])
            .await
            .unwrap();

        assert_eq!(store.view_count(&source(), day("2024-01-01")).await.unwrap(), 1);
        assert_eq!(store.view_count(&source(), day("2024-01-02")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds() {
        let consumer = consumer(InMemoryEventStore::new());
        assert_eq!(
            consumer.process_batch(&[]).await.unwrap(),
            BatchSummary::default()
        );
    }
}
