//! Intake side of the view-events pipeline.
//!
//! - [`NewEvent`] validates a raw request body
//! - [`IngestionService`] stamps accepted events with an id and the current
//!   time and writes them to the store

pub mod error;
pub mod request;
pub mod service;

pub use error::{IngestionError, Result};
pub use request::NewEvent;
pub use service::IngestionService;
