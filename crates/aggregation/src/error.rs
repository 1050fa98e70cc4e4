//! Aggregation error types.

use event_store::{EventStoreError, SequenceNumber};
use thiserror::Error;

/// A single change that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub sequence_number: SequenceNumber,
    pub message: String,
}

impl std::fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "change {}: {}", self.sequence_number, self.message)
    }
}

/// Errors that can occur while aggregating or reporting.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// An insert notification arrived without a row image.
    #[error("Change {0} carries no row image")]
    MissingImage(SequenceNumber),

    /// At least one record of a batch failed; the whole batch is failed.
    #[error("Batch failed: {} of {total} records could not be applied", failures.len())]
    BatchFailed {
        total: usize,
        failures: Vec<RecordFailure>,
    },

    /// A report query named only one of source and day.
    #[error("Missing query parameters")]
    MissingQueryParameters,

    /// A report query named a day that is not `YYYY-MM-DD`.
    #[error("Invalid query parameter: {0}")]
    InvalidQuery(#[from] common::InvalidKey),
}

impl AggregationError {
    /// Returns true when the caller sent an unacceptable request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingQueryParameters | Self::InvalidQuery(_))
    }
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregationError>;
