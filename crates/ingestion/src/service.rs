//! Ingestion service writing accepted events to the raw event store.

use chrono::{DateTime, Utc};
use event_store::{EventStore, RawEvent};

use crate::{NewEvent, Result};

/// Accepts view events and persists them as raw events.
///
/// Each accepted submission produces exactly one unconditional write. The
/// service holds no mutable state, so any number of instances can run side
/// by side. Retries are left to the caller.
pub struct IngestionService<S: EventStore> {
    store: S,
}

impl<S: EventStore> IngestionService<S> {
    /// Creates a new ingestion service writing to the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates a raw request body and records the event it describes.
    #[tracing::instrument(skip(self, body))]
    pub async fn ingest(&self, body: Option<&[u8]>) -> Result<RawEvent> {
        let new_event = NewEvent::from_body(body).inspect_err(|err| {
            tracing::debug!(reason = err.reason(), "rejected event submission");
            metrics::counter!("events_rejected_total", "reason" => err.reason()).increment(1);
        })?;
        self.record(new_event).await
    }

    /// Records an already validated event, stamped with the current time.
    pub async fn record(&self, new_event: NewEvent) -> Result<RawEvent> {
        self.record_at(new_event, Utc::now()).await
    }

    /// Records an already validated event at an explicit instant.
    #[tracing::instrument(
        skip(self, new_event),
        fields(source = %new_event.source, event_type = %new_event.event_type)
    )]
    pub async fn record_at(
        &self,
        new_event: NewEvent,
        timestamp: DateTime<Utc>,
    ) -> Result<RawEvent> {
        let event = RawEvent::at(new_event.source, new_event.event_type, timestamp);

        self.store.put_event(event.clone()).await?;

        metrics::counter!("events_ingested_total").increment(1);
        tracing::info!(event_id = %event.event_id, "event recorded");

        Ok(event)
    }
}
