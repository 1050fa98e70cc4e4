use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected key component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidKey {
    #[error("source must not be empty")]
    EmptySource,

    #[error("invalid day '{0}', expected YYYY-MM-DD")]
    Day(String),
}

/// Identifier of the origin of a view event, e.g. `"EMBEDED_VIEW"`.
///
/// Used as the partition key of both raw events and daily aggregates.
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Source(String);

impl Source {
    /// Creates a source, rejecting empty values.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidKey> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidKey::EmptySource);
        }
        Ok(Self(value))
    }

    /// Returns the source as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Source {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Source {
    type Error = InvalidKey;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Source> for String {
    fn from(source: Source) -> Self {
        source.0
    }
}

/// A UTC calendar day used as the sort key of a daily aggregate.
///
/// Always rendered as `YYYY-MM-DD`. Parsing is strict: the value must be
/// exactly ten characters with zero-padded month and day, so a string that
/// parses as a day can never be confused with an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DayBucket(NaiveDate);

impl DayBucket {
    const FORMAT: &'static str = "%Y-%m-%d";

    /// Returns the bucket containing the given instant, in UTC.
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp.date_naive())
    }

    /// Creates a bucket from a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parses a `YYYY-MM-DD` string.
    pub fn parse(value: &str) -> Result<Self, InvalidKey> {
        if !Self::has_day_shape(value) {
            return Err(InvalidKey::Day(value.to_string()));
        }
        NaiveDate::parse_from_str(value, Self::FORMAT)
            .map(Self)
            .map_err(|_| InvalidKey::Day(value.to_string()))
    }

    /// Returns true if the value looks like `dddd-dd-dd`, whether or not it
    /// names a real date.
    pub fn has_day_shape(value: &str) -> bool {
        let bytes = value.as_bytes();
        bytes.len() == 10
            && bytes.iter().enumerate().all(|(i, b)| match i {
                4 | 7 => *b == b'-',
                _ => b.is_ascii_digit(),
            })
    }

    /// Returns the underlying date.
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl std::fmt::Display for DayBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl std::str::FromStr for DayBucket {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DayBucket {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DayBucket> for String {
    fn from(day: DayBucket) -> Self {
        day.to_string()
    }
}
