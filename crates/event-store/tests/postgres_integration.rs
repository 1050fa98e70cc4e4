//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use event_store::{
    ChangeKind, ChangeStream, DailyAggregate, DayBucket, EventId, EventStore, EventStoreExt,
    PostgresEventStore, RawEvent, SequenceNumber, Source, StoredItem,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresEventStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE raw_events, daily_aggregates, change_log RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn source() -> Source {
    Source::new("EMBEDED_VIEW").unwrap()
}

fn day(value: &str) -> DayBucket {
    DayBucket::parse(value).unwrap()
}

#[tokio::test]
#[serial]
async fn test_put_and_get_event() {
    let store = get_test_store().await;
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let event = RawEvent::at(source(), "embed_123", ts);

    store.put_event(event.clone()).await.unwrap();

    let found = store.get_event(&source(), event.event_id).await.unwrap();
    assert_eq!(found, Some(event));
}

#[tokio::test]
#[serial]
async fn test_get_missing_event_returns_none() {
    let store = get_test_store().await;
    let found = store.get_event(&source(), EventId::new()).await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
#[serial]
async fn test_put_event_appends_insert_change() {
    let store = get_test_store().await;
    let event = RawEvent::new(source(), "embed_123");
    store.put_event(event.clone()).await.unwrap();

    let changes = store
        .read_changes(SequenceNumber::trim_horizon(), 10)
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Insert);

    let decoded = changes[0].new_image.as_ref().unwrap().decode().unwrap();
    let StoredItem::Event(decoded) = decoded else {
        panic!("expected an event image");
    };
    assert_eq!(decoded.event_id, event.event_id);
    assert_eq!(decoded.day(), event.day());
}

#[tokio::test]
#[serial]
async fn test_aggregate_upsert_and_read() {
    let store = get_test_store().await;
    let d = day("2024-01-01");

    assert!(store.get_aggregate(&source(), d).await.unwrap().is_none());

    store
        .put_aggregate(DailyAggregate::new(source(), d, 4))
        .await
        .unwrap();
    store
        .put_aggregate(DailyAggregate::new(source(), d, 5))
        .await
        .unwrap();

    assert_eq!(store.view_count(&source(), d).await.unwrap(), 5);

    let kinds: Vec<_> = store
        .read_changes(SequenceNumber::trim_horizon(), 10)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.kind)
        .collect();
    assert_eq!(kinds, vec![ChangeKind::Insert, ChangeKind::Modify]);
}

#[tokio::test]
#[serial]
async fn test_concurrent_increments_are_atomic() {
    let store = get_test_store().await;
    let d = day("2024-01-01");

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.increment_aggregate(&source(), d, 1).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.view_count(&source(), d).await.unwrap(), 20);
}

#[tokio::test]
#[serial]
async fn test_read_changes_pages_in_order() {
    let store = get_test_store().await;
    for _ in 0..5 {
        store
            .put_event(RawEvent::new(source(), "embed_123"))
            .await
            .unwrap();
    }

    let first = store
        .read_changes(SequenceNumber::trim_horizon(), 2)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);

    let rest = store
        .read_changes(first[1].sequence_number, 10)
        .await
        .unwrap();
    assert_eq!(rest.len(), 3);
    assert!(rest[0].sequence_number > first[1].sequence_number);
    assert_eq!(
        store.latest_sequence().await.unwrap(),
        rest[2].sequence_number
    );
}

#[tokio::test]
#[serial]
async fn test_trim_changes_keeps_newest_change() {
    let store = get_test_store().await;
    for _ in 0..3 {
        store
            .put_event(RawEvent::new(source(), "embed_123"))
            .await
            .unwrap();
    }
    let latest = store.latest_sequence().await.unwrap();

    let removed = store.trim_changes(latest).await.unwrap();

    assert_eq!(removed, 2);
    assert_eq!(store.latest_sequence().await.unwrap(), latest);
    let retained = store
        .read_changes(SequenceNumber::trim_horizon(), 10)
        .await
        .unwrap();
    assert_eq!(retained.len(), 1);
    assert!(
        store
            .read_changes(latest, 10)
            .await
            .unwrap()
            .is_empty()
    );
}
