//! View-event ingestion and report endpoints.

use std::sync::Arc;

use aggregation::{DailyReport, ReportQuery, ReportService};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use event_store::EventStore;
use ingestion::IngestionService;
use serde::Serialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub ingestion: IngestionService<S>,
    pub reports: ReportService<S>,
}

#[derive(Serialize)]
pub struct EventCreatedResponse {
    pub id: String,
}

/// POST /events — record one view event.
///
/// The body is taken raw; an empty or malformed body gets the ingestion
/// error message, not an extractor rejection.
#[tracing::instrument(skip(state, body), fields(body_len = body.len()))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Result<Json<EventCreatedResponse>, ApiError> {
    let event = state.ingestion.ingest(Some(body.as_ref())).await?;

    Ok(Json(EventCreatedResponse {
        id: event.event_id.to_string(),
    }))
}

/// GET /events/reports?source=..&day=YYYY-MM-DD — view count of one day.
#[tracing::instrument(skip(state))]
pub async fn report<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<DailyReport>, ApiError> {
    let report = state.reports.report(&query).await?;
    Ok(Json(report))
}
