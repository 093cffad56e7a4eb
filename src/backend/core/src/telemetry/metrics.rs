//! Prometheus metrics for the job lifecycle and scheduler ticks.
//!
//! Counters are recorded through the `metrics` facade, so they are no-ops
//! until [`init_metrics`] installs the Prometheus recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use jobq_core::telemetry::metrics::JobMetrics;
//!
//! JobMetrics::record_created("parse_document");
//! JobMetrics::record_dispatch("parse_document", "accepted");
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed
    #[serde(default)]
    pub enabled: bool,

    /// Listener host for the scrape endpoint
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Listener port for the scrape endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Histogram buckets for tick durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_host: default_listen_host(),
            port: default_port(),
            duration_buckets: default_duration_buckets(),
        }
    }
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
}

/// Install the Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from inside a Tokio runtime. Does nothing when disabled.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = format!("{}:{}", config.listen_host, config.port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(&config.duration_buckets)?
        .install()?;

    register_metric_descriptions();

    tracing::info!(endpoint = %addr, "Metrics initialized");
    Ok(())
}

/// Register all metric descriptions.
fn register_metric_descriptions() {
    describe_counter!("jobq_jobs_created_total", "Jobs inserted by producers");
    describe_counter!("jobq_locks_acquired_total", "Successful PENDING to PROCESSING transitions");
    describe_counter!("jobq_lock_conflicts_total", "Lock attempts that lost the race or found no pending job");
    describe_counter!("jobq_jobs_completed_total", "Jobs marked COMPLETED");
    describe_counter!("jobq_jobs_retried_total", "Failures returned to PENDING with backoff");
    describe_counter!("jobq_jobs_failed_total", "Jobs marked FAILED");
    describe_counter!("jobq_dispatch_total", "Handler calls by outcome");
    describe_counter!("jobq_jobs_archived_total", "Resolved jobs moved to history");
    describe_counter!("jobq_history_purged_total", "History rows deleted by retention");
    describe_counter!("jobq_errors_total", "Errors by code and category");
    describe_counter!("jobq_ticks_skipped_total", "Ticks skipped because one of the same kind was running");
    describe_histogram!("jobq_dispatch_tick_duration_seconds", "Dispatch tick duration in seconds");
    describe_histogram!("jobq_archive_tick_duration_seconds", "Archive tick duration in seconds");
}

/// Job lifecycle counters.
pub struct JobMetrics;

impl JobMetrics {
    pub fn record_created(task_type: &str) {
        counter!("jobq_jobs_created_total", "task_type" => task_type.to_string()).increment(1);
    }

    pub fn record_lock(acquired: bool) {
        if acquired {
            counter!("jobq_locks_acquired_total").increment(1);
        } else {
            counter!("jobq_lock_conflicts_total").increment(1);
        }
    }

    pub fn record_completed(task_type: &str) {
        counter!("jobq_jobs_completed_total", "task_type" => task_type.to_string()).increment(1);
    }

    pub fn record_retried(task_type: &str) {
        counter!("jobq_jobs_retried_total", "task_type" => task_type.to_string()).increment(1);
    }

    pub fn record_failed(task_type: &str) {
        counter!("jobq_jobs_failed_total", "task_type" => task_type.to_string()).increment(1);
    }

    /// `outcome` is one of `accepted`, `rejected`, `transport`, `timeout`,
    /// `config_missing` or `invalid_request`.
    pub fn record_dispatch(task_type: &str, outcome: &'static str) {
        counter!(
            "jobq_dispatch_total",
            "task_type" => task_type.to_string(),
            "outcome" => outcome,
        )
        .increment(1);
    }

    pub fn record_archived(count: u64) {
        counter!("jobq_jobs_archived_total").increment(count);
    }

    pub fn record_purged(count: u64) {
        counter!("jobq_history_purged_total").increment(count);
    }

    pub fn record_tick_skipped(kind: &'static str) {
        counter!("jobq_ticks_skipped_total", "kind" => kind).increment(1);
    }
}

/// Timer that records a tick duration histogram when finished.
#[derive(Debug)]
pub struct TickTimer {
    metric: &'static str,
    start: Instant,
}

impl TickTimer {
    pub fn dispatch() -> Self {
        Self::start("jobq_dispatch_tick_duration_seconds")
    }

    pub fn archive() -> Self {
        Self::start("jobq_archive_tick_duration_seconds")
    }

    fn start(metric: &'static str) -> Self {
        Self {
            metric,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record and return the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        histogram!(self.metric).record(elapsed.as_secs_f64());
        elapsed
    }
}
