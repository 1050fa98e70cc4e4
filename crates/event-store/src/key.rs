//! Compound keys for the two row shapes sharing the store.

use crate::{DayBucket, EventId, EventStoreError, Result, Source};

/// Key of a row in the store.
///
/// Raw events and daily aggregates share a partition key (the source) and
/// differ in the shape of their sort key: an event id or a day bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Event { source: Source, event_id: EventId },
    Aggregate { source: Source, day: DayBucket },
}

impl StoreKey {
    /// Rebuilds a key from its wire form, telling the row shapes apart by
    /// the sort key.
    pub fn parse(partition_key: &str, sort_key: &str) -> Result<Self> {
        let source = Source::new(partition_key)?;
        if DayBucket::has_day_shape(sort_key) {
            let day = DayBucket::parse(sort_key)?;
            return Ok(Self::Aggregate { source, day });
        }
        let event_id = EventId::parse(sort_key)
            .map_err(|_| EventStoreError::malformed(format!("unrecognized sort key '{sort_key}'")))?;
        Ok(Self::Event { source, event_id })
    }

    pub fn partition_key(&self) -> &Source {
        match self {
            Self::Event { source, .. } | Self::Aggregate { source, .. } => source,
        }
    }

    pub fn sort_key(&self) -> String {
        match self {
            Self::Event { event_id, .. } => event_id.to_string(),
            Self::Aggregate { day, .. } => day.to_string(),
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.partition_key(), self.sort_key())
    }
}
