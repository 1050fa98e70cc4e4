//! Validation of incoming event payloads.

use common::Source;
use serde::Deserialize;

use crate::{IngestionError, Result};

/// Wire shape of an event submission. Fields are optional so that missing
/// fields are reported as such rather than as a parse failure.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

/// A validated event submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub source: Source,
    pub event_type: String,
}

impl NewEvent {
    /// Creates a submission from already-typed parts.
    pub fn new(source: impl Into<String>, event_type: impl Into<String>) -> Result<Self> {
        let event_type = event_type.into();
        if event_type.is_empty() {
            return Err(IngestionError::MissingFields);
        }
        let source = Source::new(source).map_err(|_| IngestionError::MissingFields)?;
        Ok(Self { source, event_type })
    }

    /// Validates a raw request body.
    ///
    /// An absent or blank body is [`IngestionError::MissingBody`]; anything
    /// that is not a JSON object with non-empty string `type` and `source`
    /// is [`IngestionError::MissingFields`].
    pub fn from_body(body: Option<&[u8]>) -> Result<Self> {
        let body = match body {
            Some(bytes) if !bytes.trim_ascii().is_empty() => bytes,
            _ => return Err(IngestionError::MissingBody),
        };

        let envelope: Envelope =
            serde_json::from_slice(body).map_err(|_| IngestionError::MissingFields)?;

        match (envelope.source, envelope.r#type) {
            (Some(source), Some(event_type)) => Self::new(source, event_type),
            _ => Err(IngestionError::MissingFields),
        }
    }
}
