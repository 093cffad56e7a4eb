//! Error handling for jobq.
//!
//! This module provides:
//! - A single error type with machine-readable codes and error chaining
//! - User-facing vs internal messages
//! - HTTP status mapping, so worker routes can return errors directly
//! - Dedicated error kinds for path templates and dispatch failures
//! - Error metrics via the `metrics` facade
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobq_core::error::{JobqError, Result};
//!
//! fn lookup(store: &Registry, task_type: &str) -> Result<JobTypeConfig> {
//!     store
//!         .get(task_type)
//!         .ok_or_else(|| JobqError::job_type_not_found(task_type))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for jobq operations.
pub type Result<T> = std::result::Result<T, JobqError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job Errors (1000-1099)
    JobNotFound,
    JobTypeNotFound,
    InvalidJobType,
    InvalidStatus,

    // Template Errors (1100-1199)
    UnknownPlaceholder,
    MissingPlaceholderValue,
    UnterminatedPlaceholder,

    // Dispatch Errors (1200-1299)
    ConfigMissing,
    TransportFailure,
    HandlerRejected,
    DispatchTimeout,

    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    MigrationFailed,
    RecordNotFound,
    DuplicateRecord,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,
    InvalidJson,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    OperationTimeout,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::JobNotFound => 1000,
            Self::JobTypeNotFound => 1001,
            Self::InvalidJobType => 1002,
            Self::InvalidStatus => 1003,

            Self::UnknownPlaceholder => 1100,
            Self::MissingPlaceholderValue => 1101,
            Self::UnterminatedPlaceholder => 1102,

            Self::ConfigMissing => 1200,
            Self::TransportFailure => 1201,
            Self::HandlerRejected => 1202,
            Self::DispatchTimeout => 1203,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,
            Self::MigrationFailed => 2003,
            Self::RecordNotFound => 2004,
            Self::DuplicateRecord => 2005,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::InvalidJson => 2202,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
            Self::OperationTimeout => 9001,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::JobNotFound | Self::JobTypeNotFound | Self::RecordNotFound => {
                StatusCode::NOT_FOUND
            }

            Self::DuplicateRecord => StatusCode::CONFLICT,

            Self::InvalidJobType
            | Self::InvalidStatus
            | Self::UnknownPlaceholder
            | Self::MissingPlaceholderValue
            | Self::UnterminatedPlaceholder
            | Self::InvalidJson
            | Self::DeserializationError => StatusCode::UNPROCESSABLE_ENTITY,

            Self::DispatchTimeout | Self::OperationTimeout => StatusCode::GATEWAY_TIMEOUT,

            Self::TransportFailure | Self::HandlerRejected => StatusCode::BAD_GATEWAY,

            Self::DatabaseConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,

            Self::ConfigMissing
            | Self::DatabaseError
            | Self::DatabaseQueryFailed
            | Self::MigrationFailed
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure
                | Self::HandlerRejected
                | Self::DispatchTimeout
                | Self::DatabaseConnectionFailed
                | Self::DatabaseQueryFailed
                | Self::OperationTimeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            1100..=1199 => "template",
            1200..=1299 => "dispatch",
            2000..=2099 => "database",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Template Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure while parsing or rendering a dispatch path template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template names a placeholder the renderer does not know.
    #[error("unknown placeholder `{{{name}}}` in path template `{template}`")]
    UnknownPlaceholder { name: String, template: String },

    /// The template needs a value the job does not carry.
    #[error("path template `{template}` requires `{{{name}}}` but the job has no value for it")]
    MissingValue { name: String, template: String },

    /// A `{` without a closing `}`.
    #[error("unterminated placeholder at byte {position} in path template `{template}`")]
    Unterminated { position: usize, template: String },
}

impl TemplateError {
    /// Map to the matching error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownPlaceholder { .. } => ErrorCode::UnknownPlaceholder,
            Self::MissingValue { .. } => ErrorCode::MissingPlaceholderValue,
            Self::Unterminated { .. } => ErrorCode::UnterminatedPlaceholder,
        }
    }
}

impl From<TemplateError> for JobqError {
    fn from(error: TemplateError) -> Self {
        let code = error.code();
        Self::with_internal(code, "Invalid dispatch path template", error.to_string())
            .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for jobq.
#[derive(Error, Debug)]
pub struct JobqError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for JobqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl JobqError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// A job id that exists in neither the active nor the history table.
    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", job_id))
    }

    /// A task type with no registered dispatch configuration.
    pub fn job_type_not_found(task_type: &str) -> Self {
        Self::new(
            ErrorCode::JobTypeNotFound,
            format!("No configuration registered for task type `{}`", task_type),
        )
    }

    /// A job type configuration that cannot be used for dispatch.
    pub fn invalid_job_type(task_type: &str, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InvalidJobType,
            format!("Invalid configuration for task type `{}`", task_type),
            reason,
        )
    }

    /// A status integer outside the storage mapping.
    pub fn invalid_status(value: i16) -> Self {
        Self::new(
            ErrorCode::InvalidStatus,
            format!("Unknown job status value {} in storage", value),
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InvalidConfiguration,
            "Invalid configuration",
            message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Log this error, warning for retryable codes and error otherwise.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        if self.is_retryable() {
            warn!(
                error_code = %code,
                category = category,
                user_message = %self.user_message,
                internal_message = ?self.internal_message,
                "Retryable error"
            );
        } else {
            error!(
                error_code = %code,
                category = category,
                user_message = %self.user_message,
                internal_message = ?self.internal_message,
                source = ?self.source,
                "Error"
            );
        }
    }

    fn record_metrics(&self) {
        counter!(
            "jobq_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error body returned to HTTP callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Numeric error code
    pub numeric_code: u32,
    /// User-friendly error message
    pub message: String,
}

impl From<&JobqError> for ErrorResponse {
    fn from(error: &JobqError) -> Self {
        Self {
            success: false,
            code: error.code,
            numeric_code: error.code.numeric_code(),
            message: error.user_message.to_string(),
        }
    }
}

impl IntoResponse for JobqError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for JobqError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("unique") || constraint.contains("pkey") {
                        return Self::with_internal(
                            ErrorCode::DuplicateRecord,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                (ErrorCode::DatabaseQueryFailed, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            sqlx::Error::Migrate(_) => (ErrorCode::MigrationFailed, "Database migration failed"),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for JobqError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() {
            ErrorCode::DeserializationError
        } else if error.is_eof() {
            ErrorCode::InvalidJson
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for JobqError {
    fn from(error: reqwest::Error) -> Self {
        let (code, user_msg) = if error.is_timeout() {
            (ErrorCode::DispatchTimeout, "Handler request timed out")
        } else if error.is_status() {
            (ErrorCode::HandlerRejected, "Handler rejected the request")
        } else {
            (ErrorCode::TransportFailure, "Failed to reach handler")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for JobqError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
