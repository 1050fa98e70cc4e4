//! Change notifications emitted for every write to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DailyAggregate, EventStoreError, RawEvent, Result, StoreKey};

/// Position of a change in the change stream.
///
/// Sequence numbers start at 1; [`SequenceNumber::trim_horizon`] (0) sits
/// before the oldest change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Position before the oldest retained change.
    pub fn trim_horizon() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of mutation a change describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "MODIFY" => Ok(Self::Modify),
            "REMOVE" => Ok(Self::Remove),
            other => Err(EventStoreError::malformed(format!(
                "unknown change kind '{other}'"
            ))),
        }
    }
}

/// Wire-level image of a row as carried by the change stream.
///
/// Every attribute is optional so that a malformed payload can be
/// represented and rejected by [`RowImage::decode`] instead of at
/// deserialization time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RowImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
}

/// A decoded row, tagged by its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredItem {
    Event(RawEvent),
    Aggregate(DailyAggregate),
}

impl StoredItem {
    pub fn key(&self) -> StoreKey {
        match self {
            Self::Event(event) => event.key(),
            Self::Aggregate(aggregate) => aggregate.key(),
        }
    }

    pub fn image(&self) -> RowImage {
        match self {
            Self::Event(event) => RowImage::from(event),
            Self::Aggregate(aggregate) => RowImage::from(aggregate),
        }
    }
}

impl RowImage {
    /// Interprets the image as one of the two row shapes.
    pub fn decode(&self) -> Result<StoredItem> {
        let partition_key = self
            .partition_key
            .as_deref()
            .ok_or_else(|| EventStoreError::malformed("image has no PartitionKey"))?;
        let sort_key = self
            .sort_key
            .as_deref()
            .ok_or_else(|| EventStoreError::malformed("image has no SortKey"))?;

        match StoreKey::parse(partition_key, sort_key)? {
            StoreKey::Event { source, event_id } => {
                let event_type = self
                    .r#type
                    .clone()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        EventStoreError::malformed(format!("event {event_id} has no Type"))
                    })?;
                let raw = self.timestamp.as_deref().ok_or_else(|| {
                    EventStoreError::malformed(format!("event {event_id} has no Timestamp"))
                })?;
                let timestamp = DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| {
                        EventStoreError::malformed(format!(
                            "event {event_id} has invalid Timestamp '{raw}': {e}"
                        ))
                    })?
                    .with_timezone(&Utc);

                Ok(StoredItem::Event(RawEvent {
                    source,
                    event_id,
                    event_type,
                    timestamp,
                }))
            }
            StoreKey::Aggregate { source, day } => {
                let view_count = self.view_count.ok_or_else(|| {
                    EventStoreError::malformed(format!("aggregate {source}/{day} has no ViewCount"))
                })?;
                Ok(StoredItem::Aggregate(DailyAggregate::new(
                    source, day, view_count,
                )))
            }
        }
    }
}

impl From<&RawEvent> for RowImage {
    fn from(event: &RawEvent) -> Self {
        Self {
            partition_key: Some(event.source.to_string()),
            sort_key: Some(event.event_id.to_string()),
            r#type: Some(event.event_type.clone()),
            timestamp: Some(event.timestamp_iso()),
            view_count: None,
        }
    }
}

impl From<&DailyAggregate> for RowImage {
    fn from(aggregate: &DailyAggregate) -> Self {
        Self {
            partition_key: Some(aggregate.source.to_string()),
            sort_key: Some(aggregate.day.to_string()),
            r#type: None,
            timestamp: None,
            view_count: Some(aggregate.view_count),
        }
    }
}

/// A single notification on the change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub sequence_number: SequenceNumber,

    #[serde(rename = "eventName")]
    pub kind: ChangeKind,

    /// Row image after the change; absent for removals.
    #[serde(default, rename = "NewImage")]
    pub new_image: Option<RowImage>,
}

impl ChangeRecord {
    pub fn new(sequence_number: SequenceNumber, kind: ChangeKind, item: &StoredItem) -> Self {
        Self {
            sequence_number,
            kind,
            new_image: Some(item.image()),
        }
    }

    pub fn is_insert(&self) -> bool {
        self.kind == ChangeKind::Insert
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DayBucket, Source};
    use chrono::TimeZone;

    fn image(sort_key: &str, timestamp: Option<&str>) -> RowImage {
        RowImage {
            partition_key: Some("S".to_string()),
            sort_key: Some(sort_key.to_string()),
            r#type: Some("embed_123".to_string()),
            timestamp: timestamp.map(String::from),
            view_count: None,
        }
    }

    #[test]
    fn test_decode_event_image() {
        let id = crate::EventId::new();
        let item = image(&id.to_string(), Some("2024-01-01T12:00:00Z"))
            .decode()
            .unwrap();
        let StoredItem::Event(event) = item else {
            panic!("expected an event");
        };
        assert_eq!(event.event_id, id);
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_event_image_round_trips_sub_millisecond_instant() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap()
            + chrono::Duration::nanoseconds(999_999_999);
        let event = RawEvent::at(Source::new("S").unwrap(), "embed_123", ts);
        let item = StoredItem::Event(event);

        assert_eq!(item.image().decode().unwrap(), item);
    }

    #[test]
    fn test_decode_converts_offsets_to_utc() {
        let id = crate::EventId::new();
        let StoredItem::Event(event) = image(&id.to_string(), Some("2024-01-01T23:30:00-02:00"))
            .decode()
            .unwrap()
        else {
            panic!("expected an event");
        };
        assert_eq!(event.day().to_string(), "2024-01-02");
    }

    #[test]
    fn test_decode_rejects_bad_timestamp() {
        let id = crate::EventId::new().to_string();
        assert!(image(&id, Some("yesterday")).decode().is_err());
        assert!(image(&id, None).decode().is_err());
    }

    #[test]
    fn test_decode_aggregate_image() {
        let aggregate =
            DailyAggregate::new(Source::new("S").unwrap(), DayBucket::parse("2024-01-01").unwrap(), 4);
        let decoded = RowImage::from(&aggregate).decode().unwrap();
        assert_eq!(decoded, StoredItem::Aggregate(aggregate));
    }

    #[test]
    fn test_change_record_wire_format() {
        let json = serde_json::json!({
            "sequence_number": 7,
            "eventName": "INSERT",
            "NewImage": {
                "PartitionKey": "S",
                "SortKey": "67e55044-10b1-426f-9247-bb680e5fe0c8",
                "Type": "embed_123",
                "Timestamp": "2024-01-01T12:00:00.000Z"
            }
        });
        let record: ChangeRecord = serde_json::from_value(json).unwrap();
        assert!(record.is_insert());
        assert_eq!(record.sequence_number, SequenceNumber::new(7));
        assert!(record.new_image.unwrap().decode().is_ok());
    }

    #[test]
    fn test_change_kind_parses_wire_names() {
        assert_eq!("MODIFY".parse::<ChangeKind>().unwrap(), ChangeKind::Modify);
        assert!("UPSERT".parse::<ChangeKind>().is_err());
    }
}
