//! Job persistence service.
//!
//! The only component that mutates job rows. Each public operation runs in
//! one unit of work together with the event it records, so a job row and
//! its event log never disagree.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{ErrorCode, JobqError, Result};
use crate::telemetry::JobMetrics;

use super::clock::{Clock, SystemClock};
use super::store::{JobInsert, JobStore};
use super::template::PathTemplate;
use super::{
    retry_backoff, Job, JobEvent, JobHistory, JobId, JobStatus, JobTypeConfig, NewJob,
    NewJobEvent, DEFAULT_MAX_RETRIES,
};

/// What [`JobService::fail`] did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Returned to PENDING; due again at `scheduled_at`.
    Retrying {
        retry_count: i32,
        scheduled_at: DateTime<Utc>,
    },
    /// Marked FAILED.
    Failed,
    /// No active job with that id.
    NotFound,
}

/// Persistence operations over a [`JobStore`].
pub struct JobService {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Job types
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a task type's dispatch config.
    #[instrument(skip(self, config), fields(task_type = %config.task_type))]
    pub async fn register_job_type(&self, config: JobTypeConfig) -> Result<()> {
        if config.task_type.trim().is_empty() {
            return Err(JobqError::invalid_job_type(&config.task_type, "task type must not be empty"));
        }
        if config.max_retries < 0 {
            return Err(JobqError::invalid_job_type(
                &config.task_type,
                format!("max_retries must be non-negative, got {}", config.max_retries),
            ));
        }
        PathTemplate::parse(&config.path_template)?;

        let mut uow = self.store.begin().await?;
        uow.upsert_job_type(&config).await?;
        uow.commit().await?;

        info!(
            method = %config.method,
            path_template = %config.path_template,
            max_retries = config.max_retries,
            "Job type registered"
        );
        Ok(())
    }

    pub async fn job_type(&self, task_type: &str) -> Result<Option<JobTypeConfig>> {
        let mut uow = self.store.begin().await?;
        uow.job_type(task_type).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a PENDING job and return its id.
    ///
    /// A task type without config is not an error here: the job is stored
    /// with [`DEFAULT_MAX_RETRIES`] and fails at dispatch time instead.
    #[instrument(skip(self, new_job), fields(task_type = %new_job.task_type))]
    pub async fn create(&self, new_job: NewJob) -> Result<JobId> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;

        let config_retries = match uow.job_type(&new_job.task_type).await? {
            Some(config) => config.max_retries,
            None => {
                warn!("No config for task type, using default max_retries");
                DEFAULT_MAX_RETRIES
            }
        };
        let max_retries = new_job.max_retries.unwrap_or(config_retries).max(0);

        let id = uow
            .insert_job(JobInsert {
                task_type: &new_job.task_type,
                payload_id: new_job.payload_id,
                payload: new_job.payload.as_deref(),
                max_retries,
                scheduled_at: new_job.scheduled_at,
                created_at: now,
            })
            .await?;
        uow.append_event(&NewJobEvent::info(id, now, "job created")).await?;
        uow.commit().await?;

        JobMetrics::record_created(&new_job.task_type);
        info!(job_id = %id, max_retries, "Job created");
        Ok(id)
    }

    /// Move a job from PENDING to PROCESSING.
    ///
    /// Returns `true` for exactly one caller per pending period. `false`
    /// means another caller holds it, it is resolved, or it does not exist;
    /// nothing is written in that case.
    pub async fn acquire_lock(&self, job_id: JobId) -> Result<bool> {
        Ok(self.lock_job(job_id).await?.is_some())
    }

    /// [`acquire_lock`](Self::acquire_lock) that also returns the locked row.
    ///
    /// The lock and the read share one unit of work: if the read fails the
    /// lock is rolled back and the job stays PENDING.
    #[instrument(skip(self))]
    pub async fn lock_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;

        if uow.lock_pending(job_id, now).await? != 1 {
            JobMetrics::record_lock(false);
            debug!("Lock not acquired");
            return Ok(None);
        }

        let job = uow.get_job(job_id).await?.ok_or_else(|| {
            JobqError::with_internal(
                ErrorCode::JobNotFound,
                "Job vanished after lock",
                format!("job {} locked but not readable", job_id),
            )
        })?;
        uow.append_event(&NewJobEvent::info(job_id, now, "lock acquired, processing started"))
            .await?;
        uow.commit().await?;

        JobMetrics::record_lock(true);
        debug!("Lock acquired");
        Ok(Some(job))
    }

    /// Mark a job COMPLETED. Returns `false` if the id is not active.
    #[instrument(skip(self, message))]
    pub async fn complete(&self, job_id: JobId, message: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;

        let Some(mut job) = uow.get_job_for_update(job_id).await? else {
            warn!("Complete called for unknown job");
            return Ok(false);
        };

        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.updated_at = now;
        uow.update_job(&job).await?;
        uow.append_event(&NewJobEvent::info(job_id, now, format!("job completed: {}", message)))
            .await?;
        uow.commit().await?;

        JobMetrics::record_completed(&job.task_type);
        info!(task_type = %job.task_type, "Job completed");
        Ok(true)
    }

    /// Record a failed attempt.
    ///
    /// With `can_retry` and retries left, the job goes back to PENDING and is
    /// due again after `60s * retry_count`. Otherwise it is marked FAILED.
    #[instrument(skip(self, error_message))]
    pub async fn fail(&self, job_id: JobId, error_message: &str, can_retry: bool) -> Result<FailOutcome> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;

        let Some(mut job) = uow.get_job_for_update(job_id).await? else {
            warn!("Fail called for unknown job");
            return Ok(FailOutcome::NotFound);
        };

        job.last_error = Some(error_message.to_string());
        job.updated_at = now;

        let outcome = if can_retry && job.has_retries_left() {
            job.retry_count += 1;
            let scheduled_at = now + retry_backoff(job.retry_count);
            job.status = JobStatus::Pending;
            job.scheduled_at = Some(scheduled_at);
            job.started_at = None;
            job.completed_at = None;

            uow.update_job(&job).await?;
            uow.append_event(&NewJobEvent::warning(
                job_id,
                now,
                format!(
                    "attempt failed, retry {}/{} scheduled at {}: {}",
                    job.retry_count,
                    job.max_retries,
                    scheduled_at.to_rfc3339(),
                    error_message
                ),
            ))
            .await?;

            FailOutcome::Retrying {
                retry_count: job.retry_count,
                scheduled_at,
            }
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);

            let reason = if can_retry { "retries exhausted" } else { "permanent failure" };
            uow.update_job(&job).await?;
            uow.append_event(&NewJobEvent::error(
                job_id,
                now,
                format!("job failed ({}): {}", reason, error_message),
            ))
            .await?;

            FailOutcome::Failed
        };
        uow.commit().await?;

        match outcome {
            FailOutcome::Retrying { retry_count, scheduled_at } => {
                JobMetrics::record_retried(&job.task_type);
                warn!(
                    task_type = %job.task_type,
                    retry_count,
                    scheduled_at = %scheduled_at,
                    error = error_message,
                    "Job attempt failed, retry scheduled"
                );
            }
            _ => {
                JobMetrics::record_failed(&job.task_type);
                warn!(
                    task_type = %job.task_type,
                    retry_count = job.retry_count,
                    can_retry,
                    error = error_message,
                    "Job failed"
                );
            }
        }
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Polling and archival
    // ─────────────────────────────────────────────────────────────────────────

    /// PENDING jobs due now, oldest first, at most `limit`.
    pub async fn find_due(&self, limit: usize) -> Result<Vec<Job>> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;
        uow.find_due(now, limit).await
    }

    /// Move up to `batch_size` resolved jobs last updated before `older_than`
    /// into history. Returns how many moved.
    #[instrument(skip(self))]
    pub async fn archive_resolved(&self, older_than: DateTime<Utc>, batch_size: usize) -> Result<u64> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;

        let ids = uow.resolved_ids(older_than, batch_size).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let jobs = uow.jobs_by_ids(&ids).await?;
        if jobs.len() < ids.len() {
            warn!(
                selected = ids.len(),
                found = jobs.len(),
                "Some resolved jobs vanished before archival"
            );
        }

        let found: Vec<JobId> = jobs.iter().map(|job| job.id).collect();
        let history: Vec<JobHistory> = jobs.into_iter().map(|job| job.into_history(now)).collect();
        uow.insert_history(&history).await?;
        let moved = uow.delete_jobs(&found).await?;
        uow.commit().await?;

        JobMetrics::record_archived(moved);
        info!(archived = moved, "Resolved jobs archived");
        Ok(moved)
    }

    /// Delete up to `batch_size` history rows migrated before `older_than`.
    #[instrument(skip(self))]
    pub async fn purge_history(&self, older_than: DateTime<Utc>, batch_size: usize) -> Result<u64> {
        let mut uow = self.store.begin().await?;
        let purged = uow.purge_history(older_than, batch_size).await?;
        uow.commit().await?;

        if purged > 0 {
            JobMetrics::record_purged(purged);
            info!(purged, "History purged");
        }
        Ok(purged)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read paths
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let mut uow = self.store.begin().await?;
        uow.get_job(job_id).await
    }

    pub async fn get_history(&self, job_id: JobId) -> Result<Option<JobHistory>> {
        let mut uow = self.store.begin().await?;
        uow.get_history(job_id).await
    }

    /// Events for a job, oldest first. Works for active and archived jobs.
    pub async fn job_events(&self, job_id: JobId) -> Result<Vec<JobEvent>> {
        let mut uow = self.store.begin().await?;
        uow.events(job_id).await
    }
}
