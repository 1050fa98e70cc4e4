//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use aggregation::{CounterStrategyKind, TriggerConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset means in-memory
/// - `COUNTER_STRATEGY`: `read-modify-write`, `atomic` or `serialized`
/// - `DEDUP_WINDOW`: recent event ids remembered by the consumer, 0 is off
/// - `STREAM_BATCH_SIZE`, `STREAM_RETRY_ATTEMPTS`, `STREAM_BISECT_ON_ERROR`,
///   `STREAM_POLL_INTERVAL_MS`, `STREAM_TRIM_CONSUMED`: change-stream
///   trigger policy
///
/// Unparseable values, and a zero batch size or poll interval, fall back to
/// the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub counter_strategy: CounterStrategyKind,
    pub dedup_window: usize,
    pub trigger: TriggerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let trigger = TriggerConfig {
            batch_size: parse_var(&lookup, "STREAM_BATCH_SIZE")
                .filter(|size: &usize| *size > 0)
                .unwrap_or(defaults.trigger.batch_size),
            retry_attempts: parse_var(&lookup, "STREAM_RETRY_ATTEMPTS")
                .unwrap_or(defaults.trigger.retry_attempts),
            bisect_on_error: parse_var(&lookup, "STREAM_BISECT_ON_ERROR")
                .unwrap_or(defaults.trigger.bisect_on_error),
            poll_interval: parse_var(&lookup, "STREAM_POLL_INTERVAL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.trigger.poll_interval),
            trim_consumed: parse_var(&lookup, "STREAM_TRIM_CONSUMED")
                .unwrap_or(defaults.trigger.trim_consumed),
            ..defaults.trigger
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            counter_strategy: parse_var(&lookup, "COUNTER_STRATEGY")
                .unwrap_or(defaults.counter_strategy),
            dedup_window: parse_var(&lookup, "DEDUP_WINDOW").unwrap_or(defaults.dedup_window),
            trigger,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            counter_strategy: CounterStrategyKind::default(),
            dedup_window: 0,
            trigger: TriggerConfig::default(),
        }
    }
}
