use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    ChangeKind, ChangeRecord, DailyAggregate, DayBucket, EventId, EventStoreError, RawEvent,
    Result, RowImage, SequenceNumber, Source, StoredItem,
    store::{ChangeStream, EventStore},
};

/// PostgreSQL-backed store.
///
/// Raw events and daily aggregates live in separate tables; every write
/// appends to `change_log` in the same transaction.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn record_change(
        tx: &mut Transaction<'_, Postgres>,
        kind: ChangeKind,
        item: &StoredItem,
    ) -> Result<()> {
        let image = serde_json::to_value(item.image())?;
        sqlx::query("INSERT INTO change_log (kind, new_image) VALUES ($1, $2)")
            .bind(kind.as_str())
            .bind(image)
            .execute(&mut **tx)
            .await?;
        metrics::counter!("event_store_changes_appended_total", "kind" => kind.as_str())
            .increment(1);
        Ok(())
    }

    fn change_kind(inserted: bool) -> ChangeKind {
        if inserted {
            ChangeKind::Insert
        } else {
            ChangeKind::Modify
        }
    }

    fn to_view_count(value: i64) -> Result<u64> {
        u64::try_from(value)
            .map_err(|_| EventStoreError::malformed(format!("negative view count {value}")))
    }

    fn to_db_count(value: u64) -> Result<i64> {
        i64::try_from(value)
            .map_err(|_| EventStoreError::malformed(format!("view count {value} out of range")))
    }

    fn row_to_change(row: PgRow) -> Result<ChangeRecord> {
        let sequence_number: i64 = row.try_get("sequence_number")?;
        let kind: String = row.try_get("kind")?;
        let image: Option<serde_json::Value> = row.try_get("new_image")?;

        Ok(ChangeRecord {
            sequence_number: SequenceNumber::new(u64::try_from(sequence_number).map_err(
                |_| EventStoreError::malformed(format!("invalid sequence {sequence_number}")),
            )?),
            kind: kind.parse()?,
            new_image: image
                .map(serde_json::from_value::<RowImage>)
                .transpose()?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn put_event(&self, event: RawEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO raw_events (source, event_id, event_type, timestamp)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source, event_id)
            DO UPDATE SET event_type = EXCLUDED.event_type, timestamp = EXCLUDED.timestamp
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(event.source.as_str())
        .bind(event.event_id.as_uuid())
        .bind(&event.event_type)
        .bind(event.timestamp)
        .fetch_one(&mut *tx)
        .await?;

        Self::record_change(&mut tx, Self::change_kind(inserted), &StoredItem::Event(event))
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_event(&self, source: &Source, event_id: EventId) -> Result<Option<RawEvent>> {
        let row = sqlx::query(
            r#"
            SELECT event_type, timestamp
            FROM raw_events
            WHERE source = $1 AND event_id = $2
            "#,
        )
        .bind(source.as_str())
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<RawEvent> {
            let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
            Ok(RawEvent {
                source: source.clone(),
                event_id,
                event_type: row.try_get("event_type")?,
                timestamp,
            })
        })
        .transpose()
    }

    async fn get_aggregate(
        &self,
        source: &Source,
        day: DayBucket,
    ) -> Result<Option<DailyAggregate>> {
        let view_count: Option<i64> = sqlx::query_scalar(
            "SELECT view_count FROM daily_aggregates WHERE source = $1 AND day = $2",
        )
        .bind(source.as_str())
        .bind(day.date())
        .fetch_optional(&self.pool)
        .await?;

        view_count
            .map(|count| -> Result<DailyAggregate> {
                Ok(DailyAggregate::new(
                    source.clone(),
                    day,
                    Self::to_view_count(count)?,
                ))
            })
            .transpose()
    }

    async fn put_aggregate(&self, aggregate: DailyAggregate) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO daily_aggregates (source, day, view_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (source, day)
            DO UPDATE SET view_count = EXCLUDED.view_count
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(aggregate.source.as_str())
        .bind(aggregate.day.date())
        .bind(Self::to_db_count(aggregate.view_count)?)
        .fetch_one(&mut *tx)
        .await?;

        Self::record_change(
            &mut tx,
            Self::change_kind(inserted),
            &StoredItem::Aggregate(aggregate),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn increment_aggregate(&self, source: &Source, day: DayBucket, by: u64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO daily_aggregates (source, day, view_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (source, day)
            DO UPDATE SET view_count = daily_aggregates.view_count + EXCLUDED.view_count
            RETURNING view_count, (xmax = 0) AS inserted
            "#,
        )
        .bind(source.as_str())
        .bind(day.date())
        .bind(Self::to_db_count(by)?)
        .fetch_one(&mut *tx)
        .await?;

        let view_count = Self::to_view_count(row.try_get("view_count")?)?;
        let inserted: bool = row.try_get("inserted")?;

        let aggregate = DailyAggregate::new(source.clone(), day, view_count);
        Self::record_change(
            &mut tx,
            Self::change_kind(inserted),
            &StoredItem::Aggregate(aggregate),
        )
        .await?;

        tx.commit().await?;
        Ok(view_count)
    }
}

#[async_trait]
impl ChangeStream for PostgresEventStore {
    async fn read_changes(
        &self,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>> {
        let after = i64::try_from(after.as_u64())
            .map_err(|_| EventStoreError::malformed(format!("sequence {after} out of range")))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT sequence_number, kind, new_image
            FROM change_log
            WHERE sequence_number > $1
            ORDER BY sequence_number ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_change).collect()
    }

    async fn latest_sequence(&self) -> Result<SequenceNumber> {
        let latest: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(sequence_number), 0) FROM change_log")
                .fetch_one(&self.pool)
                .await?;

        Ok(SequenceNumber::new(u64::try_from(latest).unwrap_or(0)))
    }

    /// The newest row is always kept so `latest_sequence` survives a trim.
    async fn trim_changes(&self, through: SequenceNumber) -> Result<usize> {
        let through = i64::try_from(through.as_u64()).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            DELETE FROM change_log
            WHERE sequence_number <= $1
              AND sequence_number < (SELECT MAX(sequence_number) FROM change_log)
            "#,
        )
        .bind(through)
        .execute(&self.pool)
        .await?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}
