//! HTTP API server for the view-events pipeline.
//!
//! Provides the ingestion and report endpoints, wires the change-stream
//! trigger to the aggregation consumer, and exposes structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use aggregation::{AggregationConsumer, RecentEventIds, ReportService, StreamTrigger};
use axum::Router;
use axum::routing::{get, post};
use event_store::{ChangeStream, EventStore};
use ingestion::IngestionService;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::events::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/events", post(routes::events::create::<S>))
        .route("/events/reports", get(routes::events::report::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state: ingestion and reports over one store.
pub fn create_default_state<S: EventStore + Clone + 'static>(event_store: S) -> Arc<AppState<S>> {
    Arc::new(AppState {
        ingestion: IngestionService::new(event_store.clone()),
        reports: ReportService::new(event_store),
    })
}

/// Creates the change-stream trigger feeding the aggregation consumer,
/// configured with the counter strategy, dedup window and delivery policy.
pub fn create_trigger<S>(event_store: S, config: &Config) -> StreamTrigger<S, S>
where
    S: EventStore + ChangeStream + Clone + 'static,
{
    let mut consumer =
        AggregationConsumer::new(event_store.clone(), config.counter_strategy.build());
    if config.dedup_window > 0 {
        consumer = consumer.with_dedup(RecentEventIds::new(config.dedup_window));
    }
    StreamTrigger::new(event_store, consumer, config.trigger.clone())
}
