//! Handler-side protocol: acquire, execute, then complete or fail.
//!
//! A routing layer maps the dispatch call to [`run_job`] and returns the
//! [`WorkerOutcome`] as its response.

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::error::{JobqError, Result};

use super::service::{FailOutcome, JobService};
use super::JobId;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error returned by a handler's business logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<JobqError> for JobError {
    fn from(error: JobqError) -> Self {
        Self {
            message: error.user_message().to_string(),
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// What a handler sees of the job it is executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub job_id: JobId,
    pub task_type: String,
    pub payload_id: Option<i64>,
    pub payload: Option<String>,
    /// 1 for the first run, 2 for the first retry, and so on
    pub attempt: i32,
    pub max_retries: i32,
}

impl JobContext {
    /// Decode the payload as JSON into `T`.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> std::result::Result<T, JobError> {
        let raw = self
            .payload
            .as_deref()
            .ok_or_else(|| JobError::fatal("job has no payload").with_code("NO_PAYLOAD"))?;
        serde_json::from_str(raw)
            .map_err(|e| JobError::fatal(format!("invalid payload: {}", e)).with_code("INVALID_PAYLOAD"))
    }
}

/// Business logic for one task type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn task_type(&self) -> &str;

    /// Do the work. `Ok` carries a short summary for the completion event.
    async fn execute(&self, ctx: &JobContext) -> std::result::Result<String, JobError>;

    /// Whether a failure should consume a retry or fail the job outright.
    fn should_retry(&self, error: &JobError) -> bool {
        error.retryable
    }
}

/// How a [`run_job`] call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// Another caller holds the job, or it is no longer pending.
    Conflict { job_id: JobId },
    Completed { job_id: JobId, summary: String },
    Failed {
        job_id: JobId,
        error: String,
        will_retry: bool,
    },
}

impl WorkerOutcome {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Completed { .. } => StatusCode::OK,
            Self::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WorkerOutcome {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

/// Run `handler` for `job_id` under the job lock.
///
/// `payload_id` is the value the dispatch call carried; the stored value
/// wins when both are present.
pub async fn run_job(
    service: &JobService,
    handler: &dyn JobHandler,
    job_id: JobId,
    payload_id: Option<i64>,
) -> Result<WorkerOutcome> {
    let Some(job) = service.lock_job(job_id).await? else {
        info!(job_id = %job_id, task_type = handler.task_type(), "Job already taken, skipping");
        return Ok(WorkerOutcome::Conflict { job_id });
    };

    if job.task_type != handler.task_type() {
        warn!(
            job_id = %job_id,
            job_task_type = %job.task_type,
            handler_task_type = handler.task_type(),
            "Handler task type does not match job"
        );
    }

    let ctx = JobContext {
        job_id,
        task_type: job.task_type.clone(),
        payload_id: job.payload_id.or(payload_id),
        payload: job.payload.clone(),
        attempt: job.retry_count + 1,
        max_retries: job.max_retries,
    };

    match handler.execute(&ctx).await {
        Ok(summary) => {
            service.complete(job_id, &summary).await?;
            Ok(WorkerOutcome::Completed { job_id, summary })
        }
        Err(error) => {
            let can_retry = handler.should_retry(&error);
            let outcome = service.fail(job_id, &error.to_string(), can_retry).await?;
            Ok(WorkerOutcome::Failed {
                job_id,
                error: error.to_string(),
                will_retry: matches!(outcome, FailOutcome::Retrying { .. }),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::testing::{FaultyStore, Faults};
    use crate::jobs::{InMemoryJobStore, JobStatus, NewJob};
    use std::sync::Arc;

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        fn task_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, ctx: &JobContext) -> std::result::Result<String, JobError> {
            let value: serde_json::Value = ctx.payload_as()?;
            match value.get("fail").and_then(|v| v.as_str()) {
                Some("retry") => Err(JobError::retryable("upstream busy")),
                Some("fatal") => Err(JobError::fatal("bad document").with_code("BAD_DOC")),
                _ => Ok(format!("echoed attempt {}", ctx.attempt)),
            }
        }
    }

    fn service() -> JobService {
        JobService::new(Arc::new(InMemoryJobStore::new()))
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::fatal("bad document").with_code("BAD_DOC");
        assert_eq!(err.to_string(), "bad document (code: BAD_DOC)");
        assert!(!err.retryable);
        assert!(JobError::retryable("busy").retryable);
    }

    #[test]
    fn test_job_error_from_jobq_error() {
        let err: JobError = JobqError::new(ErrorCode::TransportFailure, "connection reset").into();
        assert!(err.retryable);
        assert_eq!(err.code.as_deref(), Some("TransportFailure"));
    }

    #[test]
    fn test_outcome_status_codes() {
        let id = JobId(1);
        assert_eq!(WorkerOutcome::Conflict { job_id: id }.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            WorkerOutcome::Completed { job_id: id, summary: String::new() }.status_code(),
            StatusCode::OK
        );
        let failed = WorkerOutcome::Failed { job_id: id, error: "x".into(), will_retry: true };
        assert_eq!(failed.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_run_job_completes() {
        let service = service();
        let id = service
            .create(NewJob::new("echo").payload(&serde_json::json!({})))
            .await
            .unwrap();

        let outcome = run_job(&service, &EchoHandler, id, None).await.unwrap();
        assert_eq!(
            outcome,
            WorkerOutcome::Completed { job_id: id, summary: "echoed attempt 1".into() }
        );
        let job = service.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_job_conflict_does_no_work() {
        let service = service();
        let id = service
            .create(NewJob::new("echo").payload(&serde_json::json!({})))
            .await
            .unwrap();
        assert!(service.acquire_lock(id).await.unwrap());

        let outcome = run_job(&service, &EchoHandler, id, None).await.unwrap();
        assert_eq!(outcome, WorkerOutcome::Conflict { job_id: id });
        let job = service.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_run_job_retryable_failure() {
        let service = service();
        let id = service
            .create(NewJob::new("echo").payload(&serde_json::json!({"fail": "retry"})))
            .await
            .unwrap();

        let outcome = run_job(&service, &EchoHandler, id, None).await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Failed { will_retry: true, .. }));
        let job = service.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn test_run_job_fatal_failure() {
        let service = service();
        let id = service
            .create(NewJob::new("echo").payload(&serde_json::json!({"fail": "fatal"})))
            .await
            .unwrap();

        let outcome = run_job(&service, &EchoHandler, id, None).await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Failed { will_retry: false, .. }));
        let job = service.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("bad document (code: BAD_DOC)"));
    }

    #[tokio::test]
    async fn test_read_failure_after_lock_leaves_job_pending() {
        let tables = InMemoryJobStore::new();
        let reader = JobService::new(Arc::new(tables.clone()));
        let id = reader
            .create(NewJob::new("echo").payload(&serde_json::json!({})))
            .await
            .unwrap();

        let faulty = JobService::new(Arc::new(FaultyStore::new(
            tables.clone(),
            Faults { fail_get_job: true, ..Faults::default() },
        )));
        let result = run_job(&faulty, &EchoHandler, id, None).await;
        assert!(result.is_err());

        let job = reader.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.started_at, None);
        assert_eq!(reader.job_events(id).await.unwrap().len(), 1);

        let outcome = run_job(&reader, &EchoHandler, id, None).await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_lock_job_returns_locked_row() {
        let service = service();
        let id = service.create(NewJob::new("echo").payload_id(9)).await.unwrap();

        let job = service.lock_job(id).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.payload_id, Some(9));
        assert!(service.lock_job(id).await.unwrap().is_none());
    }
}
