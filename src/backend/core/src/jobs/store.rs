//! Storage abstraction for the job tables.
//!
//! Every mutation goes through a [`UnitOfWork`] obtained from
//! [`JobStore::begin`]. Nothing is visible to other units until
//! [`UnitOfWork::commit`]; dropping a unit without committing rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

use super::{Job, JobEvent, JobHistory, JobId, JobTypeConfig, NewJobEvent};

/// Row data for a job insert; the store assigns the id.
#[derive(Debug, Clone)]
pub struct JobInsert<'a> {
    pub task_type: &'a str,
    pub payload_id: Option<i64>,
    pub payload: Option<&'a str>,
    pub max_retries: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Backend for the four job tables.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// One atomic unit of work over the job tables.
#[async_trait]
pub trait UnitOfWork: Send {
    // ─────────────────────────────────────────────────────────────────────────
    // Job types
    // ─────────────────────────────────────────────────────────────────────────

    async fn job_type(&mut self, task_type: &str) -> Result<Option<JobTypeConfig>>;

    /// Insert or replace the config for `config.task_type`.
    async fn upsert_job_type(&mut self, config: &JobTypeConfig) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Active jobs
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a PENDING job with `retry_count = 0`.
    async fn insert_job(&mut self, job: JobInsert<'_>) -> Result<JobId>;

    async fn get_job(&mut self, id: JobId) -> Result<Option<Job>>;

    /// Like [`get_job`](Self::get_job), but holds the row until the unit
    /// ends so a read-modify-write cannot interleave with another writer.
    async fn get_job_for_update(&mut self, id: JobId) -> Result<Option<Job>>;

    /// `status = PROCESSING, started_at = now WHERE id = ? AND status = PENDING`.
    ///
    /// Returns the number of rows changed (0 or 1).
    async fn lock_pending(&mut self, id: JobId, now: DateTime<Utc>) -> Result<u64>;

    /// Write back every mutable column of `job`.
    async fn update_job(&mut self, job: &Job) -> Result<()>;

    /// PENDING jobs with `scheduled_at` unset or `<= now`, oldest first.
    async fn find_due(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>>;

    /// Ids of COMPLETED/FAILED jobs last updated before `older_than`, oldest first.
    async fn resolved_ids(&mut self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<JobId>>;

    /// Fetch the jobs that still exist among `ids`.
    async fn jobs_by_ids(&mut self, ids: &[JobId]) -> Result<Vec<Job>>;

    async fn delete_jobs(&mut self, ids: &[JobId]) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_history(&mut self, rows: &[JobHistory]) -> Result<()>;

    async fn get_history(&mut self, id: JobId) -> Result<Option<JobHistory>>;

    /// Delete up to `limit` history rows migrated before `older_than`.
    async fn purge_history(&mut self, older_than: DateTime<Utc>, limit: usize) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    async fn append_event(&mut self, event: &NewJobEvent) -> Result<()>;

    /// Events for a job ordered by timestamp, then id.
    async fn events(&mut self, job_id: JobId) -> Result<Vec<JobEvent>>;

    /// Make every write of this unit visible.
    async fn commit(self: Box<Self>) -> Result<()>;
}
