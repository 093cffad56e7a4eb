//! Outbound calls to job handlers.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error::{ErrorCode, JobqError, TemplateError};

use super::template::PathTemplate;
use super::{HttpMethod, Job, JobId, JobTypeConfig};

/// Longest handler response body kept in a failure message.
const MAX_BODY_EXCERPT: usize = 512;

/// Why a job could not be handed to its handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchFailure {
    /// No config row for the job's task type.
    #[error("configuration missing for task type `{task_type}`")]
    ConfigMissing { task_type: String },

    /// The handler path could not be rendered.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// A body-carrying method with a payload that is not JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(String),

    /// Connection, DNS or protocol failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No response within the request timeout.
    #[error("handler did not respond within {0:?}")]
    Timeout(Duration),

    /// The handler answered with a status of 400 or above.
    #[error("handler rejected job with HTTP {status}: {body}")]
    HandlerRejected { status: u16, body: String },
}

impl DispatchFailure {
    /// Whether the job may be retried after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::HandlerRejected { .. }
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConfigMissing { .. } => ErrorCode::ConfigMissing,
            Self::Template(err) => err.code(),
            Self::InvalidPayload(_) => ErrorCode::InvalidJson,
            Self::Transport(_) => ErrorCode::TransportFailure,
            Self::Timeout(_) => ErrorCode::DispatchTimeout,
            Self::HandlerRejected { .. } => ErrorCode::HandlerRejected,
        }
    }

    /// Label for the `jobq_dispatch_total` outcome dimension.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::ConfigMissing { .. } => "config_missing",
            Self::Template(_) | Self::InvalidPayload(_) => "invalid_request",
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::HandlerRejected { .. } => "rejected",
        }
    }
}

impl From<DispatchFailure> for JobqError {
    fn from(failure: DispatchFailure) -> Self {
        JobqError::with_internal(failure.code(), "Job dispatch failed", failure.to_string())
            .with_source(failure)
    }
}

/// A fully rendered handler call.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub job_id: JobId,
    pub task_type: String,
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

impl DispatchRequest {
    /// Render the call for `job` against `base_url`.
    pub fn build(job: &Job, config: &JobTypeConfig, base_url: &str) -> Result<Self, DispatchFailure> {
        let template = PathTemplate::parse(&config.path_template)?;
        let path = template.render(job.id, job.payload_id)?;

        let body = match (&job.payload, config.method.carries_body()) {
            (Some(payload), true) => Some(
                serde_json::from_str::<Value>(payload)
                    .map_err(|e| DispatchFailure::InvalidPayload(e.to_string()))?,
            ),
            _ => None,
        };

        Ok(Self {
            job_id: job.id,
            task_type: job.task_type.clone(),
            method: config.method,
            url: join_url(base_url, &path),
            body,
        })
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    match (base_url.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base_url.trim_end_matches('/'), path),
        (false, false) if !path.is_empty() => format!("{}/{}", base_url, path),
        _ => format!("{}{}", base_url, path),
    }
}

/// Client that delivers a [`DispatchRequest`] to its handler.
///
/// Returns the HTTP status on acceptance (any status below 400).
#[async_trait]
pub trait DispatchClient: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<u16, DispatchFailure>;
}

/// [`DispatchClient`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpDispatchClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDispatchClient {
    pub fn new(timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jobq/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl DispatchClient for HttpDispatchClient {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<u16, DispatchFailure> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url)
            .header("X-Job-Id", request.job_id.to_string());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchFailure::Timeout(self.timeout)
            } else {
                DispatchFailure::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status >= 400 {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_BODY_EXCERPT {
                let cut = (0..=MAX_BODY_EXCERPT)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(DispatchFailure::HandlerRejected { status, body });
        }

        Ok(status)
    }
}
