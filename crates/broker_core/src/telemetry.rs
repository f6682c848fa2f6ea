//! Telemetry and observability infrastructure
//!
//! Structured logging setup for the daemon, plus a handful of process-wide
//! gauges/counters useful for `session/status` and operational visibility.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Guards that must be kept alive for the whole process for file logging
/// to keep flushing.
static LOG_GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "broker=trace").
    pub log_filter: String,
    /// Directory for rotated log files (None for stdout only).
    pub log_dir: Option<std::path::PathBuf>,
    /// Enable JSON format for logs.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,broker=debug".to_string(),
            log_dir: None,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a production configuration writing daily-rotated files.
    pub fn production(log_dir: impl AsRef<Path>) -> Self {
        Self {
            log_filter: "info,broker=debug".to_string(),
            log_dir: Some(log_dir.as_ref().to_path_buf()),
            json_logs: true,
        }
    }
}

/// Initialize the telemetry system. Call once at daemon startup; the
/// returned guard (held inside this module) must stay alive for the
/// lifetime of the process for file output to flush.
pub fn init(config: TelemetryConfig) -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = Vec::new();

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if let Some(log_dir) = config.log_dir {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "broker-daemon");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);

        if config.json_logs {
            let file_layer = fmt::layer().json().with_writer(non_blocking);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| crate::Error::Internal(format!("failed to init logging: {e}")))?;
        } else {
            let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| crate::Error::Internal(format!("failed to init logging: {e}")))?;
        }
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| crate::Error::Internal(format!("failed to init logging: {e}")))?;
    }

    LOG_GUARDS
        .set(guards)
        .map_err(|_| crate::Error::Internal("telemetry already initialized".to_string()))?;

    tracing::info!(filter = %config.log_filter, "telemetry initialized");
    Ok(())
}

/// Process-wide metrics, read by `session/status` and logged on shutdown.
pub mod metrics {
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Simple monotonic counter.
    pub struct Counter {
        value: AtomicU64,
    }

    impl Counter {
        pub const fn new() -> Self {
            Self { value: AtomicU64::new(0) }
        }

        pub fn increment(&self) {
            self.value.fetch_add(1, Ordering::Relaxed);
        }

        pub fn get(&self) -> u64 {
            self.value.load(Ordering::Relaxed)
        }
    }

    /// Gauge that can go up and down.
    pub struct Gauge {
        value: AtomicU64,
    }

    impl Gauge {
        pub const fn new() -> Self {
            Self { value: AtomicU64::new(0) }
        }

        pub fn set(&self, value: u64) {
            self.value.store(value, Ordering::Relaxed);
        }

        pub fn increment(&self) {
            self.value.fetch_add(1, Ordering::Relaxed);
        }

        pub fn decrement(&self) {
            self.value.fetch_sub(1, Ordering::Relaxed);
        }

        pub fn get(&self) -> u64 {
            self.value.load(Ordering::Relaxed)
        }
    }

    // Global metrics, one per daemon process.
    pub static PENDING_REQUESTS: Gauge = Gauge::new();
    pub static OPEN_DOCUMENTS: Gauge = Gauge::new();
    pub static API_CONNECTIONS: Gauge = Gauge::new();
    pub static WATCHER_SUPPRESSED_TICKS: Counter = Counter::new();
    pub static LSP_REQUESTS_TOTAL: Counter = Counter::new();
    pub static LSP_TIMEOUTS_TOTAL: Counter = Counter::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_and_gauge_basics() {
        let c = metrics::Counter::new();
        c.increment();
        c.increment();
        assert_eq!(c.get(), 2);

        let g = metrics::Gauge::new();
        g.set(5);
        g.increment();
        g.decrement();
        g.decrement();
        assert_eq!(g.get(), 3);
    }
}
