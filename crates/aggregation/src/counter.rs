//! Strategies for bumping a daily view counter.
//!
//! The consumer's batch logic is the same for every strategy; only the way
//! a single (source, day) counter moves from `n` to `n + 1` changes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{DayBucket, Source};
use event_store::{DailyAggregate, EventStore};
use tokio::sync::Mutex;

use crate::Result;

/// Applies one view to the counter of a source and day.
#[async_trait]
pub trait CounterStrategy: Send + Sync {
    /// Returns the name of this strategy.
    fn name(&self) -> &'static str;

    /// Returns true when overlapping increments of the same counter can
    /// never lose an update.
    fn prevents_lost_updates(&self) -> bool;

    /// Adds one view and returns the count written.
    async fn increment(&self, store: &dyn EventStore, source: &Source, day: DayBucket)
    -> Result<u64>;
}

/// Reads the current aggregate and writes back `previous + 1`, creating it
/// with a count of one when absent.
///
/// The read and the write are separate store calls. Two overlapping
/// increments of the same counter can both read `n` and both write `n + 1`,
/// losing one view.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadModifyWrite;

#[async_trait]
impl CounterStrategy for ReadModifyWrite {
    fn name(&self) -> &'static str {
        "read-modify-write"
    }

    fn prevents_lost_updates(&self) -> bool {
        false
    }

    async fn increment(
        &self,
        store: &dyn EventStore,
        source: &Source,
        day: DayBucket,
    ) -> Result<u64> {
        let aggregate = match store.get_aggregate(source, day).await? {
            Some(mut aggregate) => {
                aggregate.view_count += 1;
                aggregate
            }
            None => DailyAggregate::new(source.clone(), day, 1),
        };
        let view_count = aggregate.view_count;
        store.put_aggregate(aggregate).await?;
        Ok(view_count)
    }
}

/// Delegates to the store's atomic increment primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicIncrement;

#[async_trait]
impl CounterStrategy for AtomicIncrement {
    fn name(&self) -> &'static str {
        "atomic"
    }

    fn prevents_lost_updates(&self) -> bool {
        true
    }

    async fn increment(
        &self,
        store: &dyn EventStore,
        source: &Source,
        day: DayBucket,
    ) -> Result<u64> {
        Ok(store.increment_aggregate(source, day, 1).await?)
    }
}

type CounterKey = (Source, DayBucket);

/// Read-modify-write with at most one in-flight update per (source, day).
///
/// Serialization only covers callers sharing this instance; a second
/// process writing the same store can still interleave.
#[derive(Default)]
pub struct KeySerialized {
    inner: ReadModifyWrite,
    locks: Mutex<HashMap<CounterKey, Arc<Mutex<()>>>>,
}

impl KeySerialized {
    /// Creates a strategy with no counters locked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counters with an update in flight.
    pub async fn in_flight(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[async_trait]
impl CounterStrategy for KeySerialized {
    fn name(&self) -> &'static str {
        "serialized"
    }

    fn prevents_lost_updates(&self) -> bool {
        true
    }

    async fn increment(
        &self,
        store: &dyn EventStore,
        source: &Source,
        day: DayBucket,
    ) -> Result<u64> {
        let key = (source.clone(), day);
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().await;
            self.inner.increment(store, source, day).await
        };

        // Drop the entry once nobody else holds or waits on it.
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }

        result
    }
}

/// Selectable counter strategy, e.g. from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterStrategyKind {
    #[default]
    ReadModifyWrite,
    Atomic,
    Serialized,
}

impl CounterStrategyKind {
    /// Builds the strategy.
    pub fn build(&self) -> Arc<dyn CounterStrategy> {
        match self {
            Self::ReadModifyWrite => Arc::new(ReadModifyWrite),
            Self::Atomic => Arc::new(AtomicIncrement),
            Self::Serialized => Arc::new(KeySerialized::new()),
        }
    }
}

impl std::str::FromStr for CounterStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read-modify-write" | "rmw" => Ok(Self::ReadModifyWrite),
            "atomic" => Ok(Self::Atomic),
            "serialized" => Ok(Self::Serialized),
            other => Err(format!("unknown counter strategy '{other}'")),
        }
    }
}

impl std::fmt::Display for CounterStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ReadModifyWrite => "read-modify-write",
            Self::Atomic => "atomic",
            Self::Serialized => "serialized",
        })
    }
}
