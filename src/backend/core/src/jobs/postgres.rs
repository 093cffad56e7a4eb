//! PostgreSQL job store.
//!
//! Each unit of work is one transaction. Racing lockers serialize on the
//! row lock taken by the conditional `UPDATE ... WHERE status = 0`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::Database;
use crate::error::{JobqError, Result};

use super::store::{JobInsert, JobStore, UnitOfWork};
use super::{
    EventSeverity, HttpMethod, Job, JobEvent, JobHistory, JobId, JobStatus, JobTypeConfig,
    NewJobEvent,
};

const JOB_COLUMNS: &str = "id, task_type, payload_id, payload, status, retry_count, max_retries, \
     last_error, scheduled_at, started_at, completed_at, created_at, updated_at";

/// [`JobStore`] backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_database(database: &Database) -> Self {
        Self::new(database.pool().clone())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct JobTypeRow {
    task_type: String,
    path_template: String,
    method: String,
    max_retries: i32,
}

impl TryFrom<JobTypeRow> for JobTypeConfig {
    type Error = JobqError;

    fn try_from(row: JobTypeRow) -> Result<Self> {
        Ok(Self {
            task_type: row.task_type,
            path_template: row.path_template,
            method: row.method.parse::<HttpMethod>()?,
            max_retries: row.max_retries,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    task_type: String,
    payload_id: Option<i64>,
    payload: Option<String>,
    status: i16,
    retry_count: i32,
    max_retries: i32,
    last_error: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobqError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            id: JobId(row.id),
            task_type: row.task_type,
            payload_id: row.payload_id,
            payload: row.payload,
            status: JobStatus::from_i16(row.status)?,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            last_error: row.last_error,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    #[sqlx(flatten)]
    job: JobRow,
    migrated_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for JobHistory {
    type Error = JobqError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(Self {
            job: row.job.try_into()?,
            migrated_at: row.migrated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    job_id: i64,
    logged_at: DateTime<Utc>,
    severity: String,
    message: String,
}

impl TryFrom<EventRow> for JobEvent {
    type Error = JobqError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            job_id: JobId(row.job_id),
            timestamp: row.logged_at,
            severity: row.severity.parse::<EventSeverity>()?,
            message: row.message,
        })
    }
}

fn decode_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = JobqError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn raw_ids(ids: &[JobId]) -> Vec<i64> {
    ids.iter().map(|id| id.0).collect()
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Unit of Work
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn job_type(&mut self, task_type: &str) -> Result<Option<JobTypeConfig>> {
        let row = sqlx::query_as::<_, JobTypeRow>(
            r#"
            SELECT task_type, path_template, method, max_retries
            FROM job_type_configs
            WHERE task_type = $1
            "#,
        )
        .bind(task_type)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(JobTypeConfig::try_from).transpose()
    }

    async fn upsert_job_type(&mut self, config: &JobTypeConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_type_configs (task_type, path_template, method, max_retries)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (task_type) DO UPDATE
            SET path_template = EXCLUDED.path_template,
                method = EXCLUDED.method,
                max_retries = EXCLUDED.max_retries,
                updated_at = NOW()
            "#,
        )
        .bind(&config.task_type)
        .bind(&config.path_template)
        .bind(config.method.as_str())
        .bind(config.max_retries)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_job(&mut self, job: JobInsert<'_>) -> Result<JobId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (task_type, payload_id, payload, status, retry_count, max_retries,
                              scheduled_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $7)
            RETURNING id
            "#,
        )
        .bind(job.task_type)
        .bind(job.payload_id)
        .bind(job.payload)
        .bind(JobStatus::Pending.as_i16())
        .bind(job.max_retries)
        .bind(job.scheduled_at)
        .bind(job.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(JobId(id))
    }

    async fn get_job(&mut self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn get_job_for_update(&mut self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1 FOR UPDATE",
            JOB_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn lock_pending(&mut self, id: JobId, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, started_at = $3, updated_at = $3
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id.0)
        .bind(JobStatus::Processing.as_i16())
        .bind(now)
        .bind(JobStatus::Pending.as_i16())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn update_job(&mut self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                retry_count = $3,
                last_error = $4,
                scheduled_at = $5,
                started_at = $6,
                completed_at = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(job.id.0)
        .bind(job.status.as_i16())
        .bind(job.retry_count)
        .bind(job.last_error.as_deref())
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobqError::job_not_found(job.id));
        }
        Ok(())
    }

    async fn find_due(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE status = $1 AND (scheduled_at IS NULL OR scheduled_at <= $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
            JOB_COLUMNS
        ))
        .bind(JobStatus::Pending.as_i16())
        .bind(now)
        .bind(sql_limit(limit))
        .fetch_all(&mut *self.tx)
        .await?;

        decode_all(rows)
    }

    async fn resolved_ids(&mut self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<JobId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM jobs
            WHERE status IN ($1, $2) AND updated_at < $3
            ORDER BY updated_at ASC, id ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(JobStatus::Completed.as_i16())
        .bind(JobStatus::Failed.as_i16())
        .bind(older_than)
        .bind(sql_limit(limit))
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids.into_iter().map(JobId).collect())
    }

    async fn jobs_by_ids(&mut self, ids: &[JobId]) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = ANY($1) ORDER BY id",
            JOB_COLUMNS
        ))
        .bind(raw_ids(ids))
        .fetch_all(&mut *self.tx)
        .await?;

        decode_all(rows)
    }

    async fn delete_jobs(&mut self, ids: &[JobId]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ANY($1)")
            .bind(raw_ids(ids))
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_history(&mut self, rows: &[JobHistory]) -> Result<()> {
        for row in rows {
            let job = &row.job;
            sqlx::query(
                r#"
                INSERT INTO job_history (id, task_type, payload_id, payload, status, retry_count,
                                         max_retries, last_error, scheduled_at, started_at,
                                         completed_at, created_at, updated_at, migrated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(job.id.0)
            .bind(&job.task_type)
            .bind(job.payload_id)
            .bind(job.payload.as_deref())
            .bind(job.status.as_i16())
            .bind(job.retry_count)
            .bind(job.max_retries)
            .bind(job.last_error.as_deref())
            .bind(job.scheduled_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(row.migrated_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn get_history(&mut self, id: JobId) -> Result<Option<JobHistory>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {}, migrated_at FROM job_history WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(JobHistory::try_from).transpose()
    }

    async fn purge_history(&mut self, older_than: DateTime<Utc>, limit: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_history
            WHERE id IN (
                SELECT id FROM job_history
                WHERE migrated_at < $1
                ORDER BY migrated_at ASC, id ASC
                LIMIT $2
            )
            "#,
        )
        .bind(older_than)
        .bind(sql_limit(limit))
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn append_event(&mut self, event: &NewJobEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_events (job_id, logged_at, severity, message)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.job_id.0)
        .bind(event.timestamp)
        .bind(event.severity.as_str())
        .bind(&event.message)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn events(&mut self, job_id: JobId) -> Result<Vec<JobEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, job_id, logged_at, severity, message
            FROM job_events
            WHERE job_id = $1
            ORDER BY logged_at ASC, id ASC
            "#,
        )
        .bind(job_id.0)
        .fetch_all(&mut *self.tx)
        .await?;

        decode_all(rows)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
