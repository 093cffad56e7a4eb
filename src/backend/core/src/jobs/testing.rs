//! Store wrapper that injects faults into an [`InMemoryJobStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ErrorCode, JobqError, Result};

use super::store::{JobInsert, JobStore, UnitOfWork};
use super::{InMemoryJobStore, Job, JobEvent, JobHistory, JobId, JobTypeConfig, NewJobEvent};

/// Faults applied to every unit of work.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// `get_job` returns a database error.
    pub fail_get_job: bool,
    /// `jobs_by_ids` leaves this id out, as if it were deleted concurrently.
    pub hide_on_refetch: Option<JobId>,
}

/// Shares tables with the wrapped store; clones of `inner` see every commit.
#[derive(Debug, Clone)]
pub struct FaultyStore {
    inner: InMemoryJobStore,
    faults: Faults,
}

impl FaultyStore {
    pub fn new(inner: InMemoryJobStore, faults: Faults) -> Self {
        Self { inner, faults }
    }
}

#[async_trait]
impl JobStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(FaultyUnitOfWork {
            inner: self.inner.begin().await?,
            faults: self.faults,
        }))
    }
}

struct FaultyUnitOfWork {
    inner: Box<dyn UnitOfWork>,
    faults: Faults,
}

#[async_trait]
impl UnitOfWork for FaultyUnitOfWork {
    async fn job_type(&mut self, task_type: &str) -> Result<Option<JobTypeConfig>> {
        self.inner.job_type(task_type).await
    }

    async fn upsert_job_type(&mut self, config: &JobTypeConfig) -> Result<()> {
        self.inner.upsert_job_type(config).await
    }

    async fn insert_job(&mut self, job: JobInsert<'_>) -> Result<JobId> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&mut self, id: JobId) -> Result<Option<Job>> {
        if self.faults.fail_get_job {
            return Err(JobqError::new(ErrorCode::DatabaseError, "connection reset"));
        }
        self.inner.get_job(id).await
    }

    async fn get_job_for_update(&mut self, id: JobId) -> Result<Option<Job>> {
        self.inner.get_job_for_update(id).await
    }

    async fn lock_pending(&mut self, id: JobId, now: DateTime<Utc>) -> Result<u64> {
        self.inner.lock_pending(id, now).await
    }

    async fn update_job(&mut self, job: &Job) -> Result<()> {
        self.inner.update_job(job).await
    }

    async fn find_due(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        self.inner.find_due(now, limit).await
    }

    async fn resolved_ids(&mut self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<JobId>> {
        self.inner.resolved_ids(older_than, limit).await
    }

    async fn jobs_by_ids(&mut self, ids: &[JobId]) -> Result<Vec<Job>> {
        let mut jobs = self.inner.jobs_by_ids(ids).await?;
        if let Some(hidden) = self.faults.hide_on_refetch {
            jobs.retain(|job| job.id != hidden);
        }
        Ok(jobs)
    }

    async fn delete_jobs(&mut self, ids: &[JobId]) -> Result<u64> {
        self.inner.delete_jobs(ids).await
    }

    async fn insert_history(&mut self, rows: &[JobHistory]) -> Result<()> {
        self.inner.insert_history(rows).await
    }

    async fn get_history(&mut self, id: JobId) -> Result<Option<JobHistory>> {
        self.inner.get_history(id).await
    }

    async fn purge_history(&mut self, older_than: DateTime<Utc>, limit: usize) -> Result<u64> {
        self.inner.purge_history(older_than, limit).await
    }

    async fn append_event(&mut self, event: &NewJobEvent) -> Result<()> {
        self.inner.append_event(event).await
    }

    async fn events(&mut self, job_id: JobId) -> Result<Vec<JobEvent>> {
        self.inner.events(job_id).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }
}
