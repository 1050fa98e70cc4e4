//! Read side: the view count of one source on one day.

use common::{DayBucket, Source};
use event_store::{EventStore, EventStoreExt};
use serde::{Deserialize, Serialize};

use crate::{AggregationError, Result};

/// Query parameters of a report request. Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub day: Option<String>,
}

impl ReportQuery {
    pub fn new(source: impl Into<String>, day: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            day: Some(day.into()),
        }
    }
}

/// Report body, serialized as `{"day": ..., "viewCount": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub day: Option<DayBucket>,
    pub view_count: u64,
}

/// Answers report queries from the daily aggregates.
pub struct ReportService<S: EventStore> {
    store: S,
}

impl<S: EventStore> ReportService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the view count for the queried source and day.
    ///
    /// A query with neither parameter yields an empty report without
    /// touching the store. A query with only one of them is rejected.
    #[tracing::instrument(skip(self))]
    pub async fn report(&self, query: &ReportQuery) -> Result<DailyReport> {
        let source = query.source.as_deref().filter(|s| !s.is_empty());
        let day = query.day.as_deref().filter(|d| !d.is_empty());

        match (source, day) {
            (None, None) => Ok(DailyReport {
                day: None,
                view_count: 0,
            }),
            (Some(source), Some(day)) => {
                let source = Source::new(source)?;
                let day = DayBucket::parse(day)?;
                self.daily_count(&source, day).await
            }
            _ => Err(AggregationError::MissingQueryParameters),
        }
    }

    /// Point read of one counter; zero when no view was counted yet.
    pub async fn daily_count(&self, source: &Source, day: DayBucket) -> Result<DailyReport> {
        let view_count = self.store.view_count(source, day).await?;
        tracing::debug!(%source, %day, view_count, "report served");
        Ok(DailyReport {
            day: Some(day),
            view_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{DailyAggregate, InMemoryEventStore};

    async fn service_with(count: u64) -> ReportService<InMemoryEventStore> {
        let store = InMemoryEventStore::new();
        store
            .put_aggregate(DailyAggregate::new(
                Source::new("EMBEDED_VIEW").unwrap(),
                DayBucket::parse("2024-01-01").unwrap(),
                count,
            ))
            .await
            .unwrap();
        ReportService::new(store)
    }

    #[tokio::test]
    async fn test_report_returns_stored_count() {
        let service = service_with(42).await;

        let report = service
            .report(&ReportQuery::new("EMBEDED_VIEW", "2024-01-01"))
            .await
            .unwrap();

        assert_eq!(report.view_count, 42);
        assert_eq!(report.day.unwrap().to_string(), "2024-01-01");
    }

    #[tokio::test]
    async fn test_report_for_unknown_day_is_zero() {
        let service = service_with(42).await;

        let report = service
            .report(&ReportQuery::new("EMBEDED_VIEW", "2024-01-02"))
            .await
            .unwrap();

        assert_eq!(report.view_count, 0);
    }

    #[tokio::test]
    async fn test_report_without_parameters_is_empty() {
        let service = service_with(42).await;

        let report = service.report(&ReportQuery::default()).await.unwrap();

        assert_eq!(
            report,
            DailyReport {
                day: None,
                view_count: 0
            }
        );
    }

    #[tokio::test]
    async fn test_report_with_one_parameter_is_rejected() {
        let service = service_with(42).await;
        let only_source = ReportQuery {
            source: Some("EMBEDED_VIEW".to_string()),
            day: None,
        };
        let empty_day = ReportQuery::new("EMBEDED_VIEW", "");

        for query in [only_source, empty_day] {
            let err = service.report(&query).await.unwrap_err();
            assert!(matches!(err, AggregationError::MissingQueryParameters));
            assert!(err.is_client_error());
        }
    }

    #[tokio::test]
    async fn test_report_with_invalid_day_is_rejected() {
        let service = service_with(42).await;

        for day in ["2024-1-1", "2024-02-30", "yesterday"] {
            let err = service
                .report(&ReportQuery::new("EMBEDED_VIEW", day))
                .await
                .unwrap_err();
            assert!(matches!(err, AggregationError::InvalidQuery(_)), "day {day}");
        }
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = DailyReport {
            day: Some(DayBucket::parse("2024-01-01").unwrap()),
            view_count: 3,
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({"day": "2024-01-01", "viewCount": 3})
        );
        let empty = DailyReport {
            day: None,
            view_count: 0,
        };
        assert_eq!(
            serde_json::to_value(&empty).unwrap(),
            serde_json::json!({"day": null, "viewCount": 0})
        );
    }
}
