//! Job records and their storage mapping.
//!
//! This module holds the shape of the four stored record kinds:
//!
//! - **JobTypeConfig**: dispatch target and retry ceiling per task type
//! - **Job**: an active unit of work
//! - **JobHistory**: a resolved job moved out of the active table
//! - **JobEvent**: append-only log entry written alongside every job mutation
//!
//! Status and method enums carry an explicit mapping to their stored
//! representation; nothing relies on declaration order.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{JobqError, Result};

/// Retry ceiling used when a job is created for a task type with no config.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Linear backoff step: the n-th retry waits `n * RETRY_BACKOFF_STEP_SECS`.
pub const RETRY_BACKOFF_STEP_SECS: i64 = 60;

/// Delay before a job that has been retried `retry_count` times is due again.
pub fn retry_backoff(retry_count: i32) -> Duration {
    Duration::seconds(RETRY_BACKOFF_STEP_SECS * i64::from(retry_count))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifier assigned to a job at creation; survives archival unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
///
/// Storage mapping (the `status` SMALLINT column):
///
/// | variant      | stored |
/// |--------------|-------:|
/// | `Pending`    | 0 |
/// | `Processing` | 1 |
/// | `Completed`  | 2 |
/// | `Failed`     | 3 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting to be locked by a handler
    Pending,
    /// Locked by exactly one handler
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with no retries left, or failed permanently
    Failed,
}

impl JobStatus {
    /// Every status, in storage order.
    pub const ALL: [JobStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    /// Stored integer for this status.
    pub const fn as_i16(&self) -> i16 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed => 2,
            Self::Failed => 3,
        }
    }

    /// Decode a stored integer.
    pub fn from_i16(value: i16) -> Result<Self> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Processing),
            2 => Ok(Self::Completed),
            3 => Ok(Self::Failed),
            other => Err(JobqError::invalid_status(other)),
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity of a job event, stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

impl EventSeverity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSeverity {
    type Err = JobqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(JobqError::internal(format!(
                "unknown event severity `{}` in storage",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dispatch Method
// ═══════════════════════════════════════════════════════════════════════════════

/// HTTP method used to call a task type's handler, stored as uppercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the job payload is sent as the request body.
    pub const fn carries_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = JobqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(JobqError::configuration(format!(
                "unsupported dispatch method `{}`",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// Dispatch configuration for one task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTypeConfig {
    /// Unique task type key
    pub task_type: String,
    /// Handler path with `{job_id}` / `{payload_id}` placeholders
    pub path_template: String,
    /// Method used for the handler call
    pub method: HttpMethod,
    /// Retry ceiling copied onto jobs at creation
    pub max_retries: i32,
}

impl JobTypeConfig {
    pub fn new(
        task_type: impl Into<String>,
        method: HttpMethod,
        path_template: impl Into<String>,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            path_template: path_template.into(),
            method,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Producer input for [`JobService::create`](super::JobService::create).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub task_type: String,
    pub payload_id: Option<i64>,
    pub payload: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: Option<i32>,
}

impl NewJob {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn payload_id(mut self, payload_id: i64) -> Self {
        self.payload_id = Some(payload_id);
        self
    }

    /// Attach a JSON payload.
    pub fn payload(mut self, payload: &serde_json::Value) -> Self {
        self.payload = Some(payload.to_string());
        self
    }

    /// Attach a raw payload blob.
    pub fn raw_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// An active unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_type: String,
    pub payload_id: Option<i64>,
    pub payload: Option<String>,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    /// Earliest dispatch time; `None` means immediately eligible
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether `find_due` would return this job at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at.map_or(true, |at| at <= now)
    }

    /// Whether another failure may still be retried.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the archive sweep would move this job for the given cutoff.
    pub fn is_archivable(&self, older_than: DateTime<Utc>) -> bool {
        self.status.is_terminal() && self.updated_at < older_than
    }

    /// Verbatim copy into the history shape.
    pub fn into_history(self, migrated_at: DateTime<Utc>) -> JobHistory {
        JobHistory {
            job: self,
            migrated_at,
        }
    }
}

/// A resolved job moved out of the active table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHistory {
    #[serde(flatten)]
    pub job: Job,
    pub migrated_at: DateTime<Utc>,
}

/// Entry in the job event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub message: String,
}

/// Event waiting to be appended inside a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobEvent {
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub message: String,
}

impl NewJobEvent {
    pub fn info(job_id: JobId, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(job_id, timestamp, EventSeverity::Info, message)
    }

    pub fn warning(job_id: JobId, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(job_id, timestamp, EventSeverity::Warning, message)
    }

    pub fn error(job_id: JobId, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(job_id, timestamp, EventSeverity::Error, message)
    }

    fn new(
        job_id: JobId,
        timestamp: DateTime<Utc>,
        severity: EventSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            timestamp,
            severity,
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
