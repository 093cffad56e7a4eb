//! Configuration management.
//!
//! Values come from an optional file plus `JOBQ__`-prefixed environment
//! variables, e.g. `JOBQ__SCHEDULER__DISPATCH_INTERVAL=30s` or
//! `JOBQ__DISPATCH__BASE_URL=http://workers:8080`.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{JobqError, Result};
use crate::telemetry::{LogFormat, LoggingConfig, MetricsConfig};

const ENV_PREFIX: &str = "JOBQ";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Polling and archival configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Handler dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Time to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,

    /// Run embedded migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Period of the dispatch loop
    #[serde(default = "default_dispatch_interval", with = "humantime_serde")]
    pub dispatch_interval: Duration,

    /// Period of the archive loop
    #[serde(default = "default_archive_interval", with = "humantime_serde")]
    pub archive_interval: Duration,

    /// Maximum due jobs fetched per dispatch tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Resolved jobs stay in the active table this many days
    #[serde(default = "default_active_retention_days")]
    pub active_retention_days: u32,

    /// History rows older than this many days are purged; unset keeps them
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: Option<u32>,

    /// Maximum rows moved or purged per archive tick
    #[serde(default = "default_archive_batch_size")]
    pub archive_batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: default_dispatch_interval(),
            archive_interval: default_archive_interval(),
            batch_size: default_batch_size(),
            active_retention_days: default_active_retention_days(),
            history_retention_days: default_history_retention_days(),
            archive_batch_size: default_archive_batch_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn active_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.active_retention_days))
    }

    pub fn history_retention(&self) -> Option<chrono::Duration> {
        self.history_retention_days
            .map(|days| chrono::Duration::days(i64::from(days)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Base URL prepended to every rendered handler path
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound on a single handler call
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format: json, pretty or compact
    #[serde(default)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    /// Prometheus listener port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_enabled: default_metrics_enabled(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl ObservabilityConfig {
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            ..LoggingConfig::default()
        }
    }

    pub fn metrics(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.metrics_enabled,
            port: self.metrics_port,
            ..MetricsConfig::default()
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_run_migrations() -> bool { true }
fn default_dispatch_interval() -> Duration { Duration::from_secs(15) }
fn default_archive_interval() -> Duration { Duration::from_secs(300) }
fn default_batch_size() -> usize { 50 }
fn default_active_retention_days() -> u32 { 7 }
fn default_history_retention_days() -> Option<u32> { Some(90) }
fn default_archive_batch_size() -> usize { 500 }
fn default_base_url() -> String { "http://localhost:8080".to_string() }
fn default_request_timeout() -> Duration { Duration::from_secs(30) }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_enabled() -> bool { false }
fn default_metrics_port() -> u16 { 9090 }

impl Config {
    /// Load configuration from environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would stall or spin the scheduler loops.
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if scheduler.dispatch_interval.is_zero() {
            return Err(JobqError::configuration("scheduler.dispatch_interval must be non-zero"));
        }
        if scheduler.archive_interval.is_zero() {
            return Err(JobqError::configuration("scheduler.archive_interval must be non-zero"));
        }
        if scheduler.batch_size == 0 {
            return Err(JobqError::configuration("scheduler.batch_size must be positive"));
        }
        if scheduler.archive_batch_size == 0 {
            return Err(JobqError::configuration("scheduler.archive_batch_size must be positive"));
        }
        if self.dispatch.request_timeout.is_zero() {
            return Err(JobqError::configuration("dispatch.request_timeout must be non-zero"));
        }
        if !self.dispatch.base_url.starts_with("http://")
            && !self.dispatch.base_url.starts_with("https://")
        {
            return Err(JobqError::configuration(format!(
                "dispatch.base_url `{}` must be an http(s) URL",
                self.dispatch.base_url
            )));
        }
        Ok(())
    }
}
