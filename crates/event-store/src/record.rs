use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DayBucket, EventStoreError, Result, Source, StoreKey};

/// Unique identifier for a raw event.
///
/// Rendered as a hyphenated UUID, which is 36 characters long and can never
/// take the `YYYY-MM-DD` shape of a day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses an event ID from its string form.
    pub fn parse(value: &str) -> Result<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| EventStoreError::malformed(format!("invalid event id '{value}': {e}")))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A single recorded view. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Partition key.
    pub source: Source,

    /// Sort key.
    pub event_id: EventId,

    /// The kind of view, e.g. `"embed_123"`.
    pub event_type: String,

    /// When the event was accepted.
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    /// Creates a raw event with a fresh id, stamped with the current time.
    pub fn new(source: Source, event_type: impl Into<String>) -> Self {
        Self::at(source, event_type, Utc::now())
    }

    /// Creates a raw event with a fresh id at an explicit instant.
    ///
    /// The instant is truncated to milliseconds, the precision of the
    /// stored and streamed timestamp.
    pub fn at(source: Source, event_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source,
            event_id: EventId::new(),
            event_type: event_type.into(),
            timestamp: timestamp.trunc_subsecs(3),
        }
    }

    /// Returns the store key of this event.
    pub fn key(&self) -> StoreKey {
        StoreKey::Event {
            source: self.source.clone(),
            event_id: self.event_id,
        }
    }

    /// Returns the day bucket this event is counted in.
    pub fn day(&self) -> DayBucket {
        DayBucket::from_timestamp(self.timestamp)
    }

    /// Returns the timestamp in ISO-8601 form with millisecond precision.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// View count of one source on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAggregate {
    /// Partition key.
    pub source: Source,

    /// Sort key.
    pub day: DayBucket,

    pub view_count: u64,
}

impl DailyAggregate {
    pub fn new(source: Source, day: DayBucket, view_count: u64) -> Self {
        Self {
            source,
            day,
            view_count,
        }
    }

    /// Returns the store key of this aggregate.
    pub fn key(&self) -> StoreKey {
        StoreKey::Aggregate {
            source: self.source.clone(),
            day: self.day,
        }
    }
}
