//! API server entry point.

use api::config::Config;
use event_store::{ChangeStream, EventStore, InMemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Runs the HTTP server and the change-stream trigger over one store until
/// a shutdown signal arrives.
async fn serve<S>(event_store: S, config: Config, metrics_handle: PrometheusHandle)
where
    S: EventStore + ChangeStream + Clone + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let trigger = api::create_trigger(event_store.clone(), &config);
    let trigger_task = tokio::spawn(trigger.run(shutdown_rx));

    let state = api::create_default_state(event_store);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop the trigger after in-flight requests have drained.
    let _ = shutdown_tx.send(true);
    if let Err(err) = trigger_task.await {
        tracing::error!(error = %err, "stream trigger task failed");
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    tracing::info!(
        counter_strategy = %config.counter_strategy,
        dedup_window = config.dedup_window,
        "configuration loaded"
    );

    // 3. Pick the store and run
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresEventStore::connect(&url, 5)
                .await
                .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            serve(store, config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            serve(InMemoryEventStore::new(), config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
