//! Telemetry: structured logging and Prometheus metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use jobq_core::telemetry::{init_telemetry, LoggingConfig, MetricsConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! init_telemetry(&LoggingConfig::default(), &MetricsConfig::default())?;
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, JobMetrics, MetricsConfig, TickTimer};

/// Initialize logging, then metrics. Call once at startup inside the runtime.
pub fn init_telemetry(logging: &LoggingConfig, metrics: &MetricsConfig) -> anyhow::Result<()> {
    init_logging(logging)?;
    init_metrics(metrics)?;

    ::tracing::info!(
        service_name = env!("CARGO_PKG_NAME"),
        service_version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );
    Ok(())
}
