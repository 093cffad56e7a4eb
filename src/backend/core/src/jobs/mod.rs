//! Persistent job queue.
//!
//! - **Store**: unit-of-work trait over the four job tables, with
//!   PostgreSQL and in-process backends
//! - **Service**: create, lock, complete, fail, archive; the only writer
//! - **Scheduler**: polls due jobs and fans out handler calls; archives
//!   resolved jobs
//! - **Worker**: the acquire/execute/complete protocol handlers follow
//!
//! # Architecture
//!
//! ```text
//!  producer ──create──▶ ┌────────────┐ ◀──find_due── ┌───────────┐ ──HTTP──▶ handler
//!                       │ JobService │               │ Scheduler │              │
//!                       │  (store)   │ ◀─archive──── └───────────┘              │
//!                       └────────────┘ ◀──acquire_lock / complete / fail────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobq_core::jobs::{
//!     HttpMethod, InMemoryJobStore, JobService, JobTypeConfig, NewJob,
//! };
//!
//! let service = JobService::new(Arc::new(InMemoryJobStore::new()));
//! service
//!     .register_job_type(JobTypeConfig::new(
//!         "parse_document",
//!         HttpMethod::Post,
//!         "/internal/documents/{payload_id}/parse",
//!     ))
//!     .await?;
//! let id = service.create(NewJob::new("parse_document").payload_id(42)).await?;
//! ```

pub mod clock;
pub mod dispatch;
pub mod job;
pub mod memory;
pub mod postgres;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod template;
#[cfg(test)]
pub(crate) mod testing;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchClient, DispatchFailure, DispatchRequest, HttpDispatchClient};
pub use job::{
    retry_backoff, EventSeverity, HttpMethod, Job, JobEvent, JobHistory, JobId, JobStatus,
    JobTypeConfig, NewJob, NewJobEvent, DEFAULT_MAX_RETRIES, RETRY_BACKOFF_STEP_SECS,
};
pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;
pub use scheduler::{ArchiveReport, JobScheduler, SchedulerHandle, SchedulerSettings, TickReport};
pub use service::{FailOutcome, JobService};
pub use store::{JobInsert, JobStore, UnitOfWork};
pub use template::PathTemplate;
pub use worker::{run_job, JobContext, JobError, JobHandler, WorkerOutcome};
