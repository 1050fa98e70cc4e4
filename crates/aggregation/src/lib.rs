//! Aggregation side of the view-events pipeline.
//!
//! This crate turns the change stream into per-source daily view counts:
//! - [`AggregationConsumer`] folds a batch of change notifications into
//!   daily aggregates
//! - [`CounterStrategy`] decides how a single counter is bumped, from the
//!   plain read-modify-write to a store-side atomic increment
//! - [`RecentEventIds`] optionally drops redelivered events
//! - [`StreamTrigger`] polls the change stream and applies the batching,
//!   bisect, retry and dead-letter policy
//! - [`ReportService`] reads a single counter back

pub mod consumer;
pub mod counter;
pub mod dedup;
pub mod error;
pub mod report;
pub mod trigger;

pub use consumer::{AggregationConsumer, BatchSummary};
pub use counter::{
    AtomicIncrement, CounterStrategy, CounterStrategyKind, KeySerialized, ReadModifyWrite,
};
pub use dedup::RecentEventIds;
pub use error::{AggregationError, RecordFailure, Result};
pub use report::{DailyReport, ReportQuery, ReportService};
pub use trigger::{
    DeadLetter, DeadLetterQueue, PollSummary, StartingPosition, StreamTrigger, TriggerConfig,
};
