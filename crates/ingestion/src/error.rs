//! Ingestion error types.

use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while accepting an event.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The request carried no body.
    #[error("Missing body")]
    MissingBody,

    /// The body is not an event envelope or lacks `type` / `source`.
    #[error("Missing type and/or source")]
    MissingFields,

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),
}

impl IngestionError {
    /// Returns true when the caller sent an unacceptable request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingBody | Self::MissingFields)
    }

    /// Short label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingBody => "missing_body",
            Self::MissingFields => "missing_fields",
            Self::EventStore(_) => "store",
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
