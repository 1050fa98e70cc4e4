use thiserror::Error;

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A key component was rejected.
    #[error("Invalid key: {0}")]
    InvalidKey(#[from] common::InvalidKey),

    /// A stored row or change image could not be interpreted.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRecord(message.into())
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
