//! Shared key types for the view-events pipeline.
//!
//! Both row shapes in the store are partitioned by [`Source`]; daily
//! aggregates are additionally keyed by a [`DayBucket`].

pub mod types;

pub use types::{DayBucket, InvalidKey, Source};
