#![allow(clippy::result_large_err)]
//! # jobq Core
//!
//! Persistent job queue and polling scheduler for long-running asynchronous
//! work.
//!
//! ## Architecture
//!
//! - **Jobs**: durable job records, at-most-one active execution per job,
//!   linear retry backoff and a terminal failure boundary
//! - **Scheduler**: polls due work and dispatches it to stateless HTTP handlers
//! - **Database**: PostgreSQL pool and embedded migrations
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{ErrorCode, JobqError, Result, TemplateError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::db::Database;
    pub use crate::error::{ErrorCode, JobqError, Result};
    pub use crate::jobs::{
        run_job, DispatchClient, HttpDispatchClient, HttpMethod, InMemoryJobStore, Job,
        JobContext, JobError, JobHandler, JobId, JobScheduler, JobService, JobStatus, JobStore,
        JobTypeConfig, NewJob, PgJobStore, SchedulerSettings, WorkerOutcome,
    };
}
