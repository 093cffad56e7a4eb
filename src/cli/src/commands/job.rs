//! Job commands: create, show and event trail.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use jobq_core::jobs::{Job, JobEvent, JobId, NewJob};
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use crate::context::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Enqueue a new job
    Create {
        /// Task type key
        #[arg(short = 't', long = "type")]
        task_type: String,

        /// Identifier of the entity the job works on
        #[arg(long)]
        payload_id: Option<i64>,

        /// Inline JSON payload
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Read the JSON payload from a file
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Earliest run time (RFC 3339)
        #[arg(long, conflicts_with = "delay_secs")]
        scheduled_at: Option<DateTime<Utc>>,

        /// Earliest run time as seconds from now
        #[arg(long)]
        delay_secs: Option<i64>,

        /// Override the task type's retry ceiling
        #[arg(long)]
        max_retries: Option<i32>,
    },

    /// Show a job, looking in history when it is no longer active
    Show {
        /// Job ID
        id: JobId,
    },

    /// List the event trail of a job
    Events {
        /// Job ID
        id: JobId,
    },
}

/// Event row for table display.
#[derive(Tabled, Serialize)]
struct EventRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl EventRow {
    fn from_event(event: &JobEvent, colored: bool) -> Self {
        Self {
            id: event.id,
            timestamp: event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            severity: if colored {
                output::colored_severity(event.severity)
            } else {
                event.severity.as_str().to_uppercase()
            },
            message: event.message.clone(),
        }
    }
}

/// Execute a job subcommand.
pub async fn execute(cmd: JobCommands, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Create {
            task_type,
            payload_id,
            payload,
            payload_file,
            scheduled_at,
            delay_secs,
            max_retries,
        } => {
            let mut new_job = NewJob::new(task_type.clone());
            if let Some(payload_id) = payload_id {
                new_job = new_job.payload_id(payload_id);
            }
            if let Some(raw) = read_payload(payload, payload_file)? {
                new_job = new_job.raw_payload(raw);
            }
            let scheduled_at = match (scheduled_at, delay_secs) {
                (Some(at), _) => Some(at),
                (None, Some(secs)) => Some(offset_from(ctx.service.now(), secs)?),
                (None, None) => None,
            };
            if let Some(at) = scheduled_at {
                new_job = new_job.scheduled_at(at);
            }
            if let Some(max_retries) = max_retries {
                new_job = new_job.max_retries(max_retries);
            }

            let id = ctx.service.create(new_job).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Job {} created ({})", id, task_type));
                }
                _ => output::print_item(&serde_json::json!({ "id": id }), format)?,
            }
        }

        JobCommands::Show { id } => {
            if let Some(job) = ctx.service.get_job(id).await? {
                match format {
                    OutputFormat::Table => print_job(&job, None),
                    _ => output::print_item(&job, format)?,
                }
            } else if let Some(history) = ctx.service.get_history(id).await? {
                match format {
                    OutputFormat::Table => print_job(&history.job, Some(history.migrated_at)),
                    _ => output::print_item(&history, format)?,
                }
            } else {
                anyhow::bail!("Job {} not found", id);
            }
        }

        JobCommands::Events { id } => {
            let events = ctx.service.job_events(id).await?;
            let colored = matches!(format, OutputFormat::Table);
            let rows: Vec<EventRow> = events
                .iter()
                .map(|event| EventRow::from_event(event, colored))
                .collect();

            if matches!(format, OutputFormat::Table) {
                output::print_header(&format!("Events for job {}", id));
            }
            output::print_list(&rows, format)?;
        }
    }

    Ok(())
}

/// Inline payload wins; otherwise read the file. Either must be valid JSON.
fn read_payload(inline: Option<String>, file: Option<PathBuf>) -> Result<Option<String>> {
    let raw = match (inline, file) {
        (Some(raw), _) => raw,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read payload file {}", path.display()))?,
        (None, None) => return Ok(None),
    };
    serde_json::from_str::<serde_json::Value>(&raw).context("Payload is not valid JSON")?;
    Ok(Some(raw))
}

/// `now + secs`, rejecting offsets chrono cannot represent.
fn offset_from(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>> {
    let Some(delay) = chrono::Duration::try_seconds(secs) else {
        anyhow::bail!("--delay-secs {} is out of range", secs);
    };
    now.checked_add_signed(delay)
        .with_context(|| format!("--delay-secs {} is out of range", secs))
}

fn print_job(job: &Job, migrated_at: Option<DateTime<Utc>>) {
    let title = match migrated_at {
        Some(_) => format!("Job {} (archived)", job.id),
        None => format!("Job {}", job.id),
    };
    output::print_header(&title);
    output::print_detail("Type", &job.task_type);
    output::print_detail("Status", &output::colored_status(job.status));
    output::print_detail(
        "Retries",
        &format!("{}/{}", job.retry_count, job.max_retries),
    );
    output::print_detail("Payload ID", &output::or_dash(job.payload_id));
    output::print_detail("Payload", &output::or_dash(job.payload.as_deref()));
    output::print_detail("Last error", &output::or_dash(job.last_error.as_deref()));
    output::print_detail("Scheduled", &output::or_dash(job.scheduled_at.map(|t| t.to_rfc3339())));
    output::print_detail("Started", &output::or_dash(job.started_at.map(|t| t.to_rfc3339())));
    output::print_detail("Completed", &output::or_dash(job.completed_at.map(|t| t.to_rfc3339())));
    output::print_detail("Created", &job.created_at.to_rfc3339());
    output::print_detail("Updated", &job.updated_at.to_rfc3339());
    if let Some(at) = migrated_at {
        output::print_detail("Archived", &at.to_rfc3339());
    }
}
