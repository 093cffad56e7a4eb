//! Task type registration commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use jobq_core::jobs::{HttpMethod, JobTypeConfig, DEFAULT_MAX_RETRIES};
use jobq_core::JobqError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tabled::Tabled;

use crate::context::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum TypeCommands {
    /// Register or replace task type configurations
    Register {
        /// Task type key
        #[arg(required_unless_present = "file")]
        task_type: Option<String>,

        /// Handler path, e.g. /internal/documents/{payload_id}/parse
        #[arg(short, long, required_unless_present = "file")]
        path: Option<String>,

        /// HTTP method for the handler call
        #[arg(short, long, default_value = "POST")]
        method: String,

        /// Retry ceiling for new jobs of this type
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: i32,

        /// YAML file listing several task types
        #[arg(short, long, conflicts_with_all = ["task_type", "path"])]
        file: Option<PathBuf>,
    },

    /// Show the configuration of a task type
    Show {
        /// Task type key
        task_type: String,
    },
}

/// One entry of a task type file.
///
/// ```yaml
/// - task_type: parse_document
///   path: /internal/documents/{payload_id}/parse
///   method: POST
///   max_retries: 5
/// ```
#[derive(Debug, Deserialize)]
struct TypeEntry {
    task_type: String,
    path: String,
    #[serde(default = "default_method")]
    method: HttpMethod,
    #[serde(default = "default_max_retries")]
    max_retries: i32,
}

fn default_method() -> HttpMethod {
    HttpMethod::Post
}

fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

impl From<TypeEntry> for JobTypeConfig {
    fn from(entry: TypeEntry) -> Self {
        JobTypeConfig::new(entry.task_type, entry.method, entry.path)
            .with_max_retries(entry.max_retries)
    }
}

/// Task type row for table display.
#[derive(Tabled, Serialize)]
struct TypeRow {
    #[tabled(rename = "Type")]
    task_type: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Max Retries")]
    max_retries: i32,
}

impl From<&JobTypeConfig> for TypeRow {
    fn from(config: &JobTypeConfig) -> Self {
        Self {
            task_type: config.task_type.clone(),
            method: config.method.to_string(),
            path: config.path_template.clone(),
            max_retries: config.max_retries,
        }
    }
}

/// Execute a task type subcommand.
pub async fn execute(cmd: TypeCommands, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    match cmd {
        TypeCommands::Register {
            task_type,
            path,
            method,
            max_retries,
            file,
        } => {
            let configs = match (file, task_type, path) {
                (Some(file), _, _) => load_type_file(&file)?,
                (None, Some(task_type), Some(path)) => {
                    let method: HttpMethod = method.parse()?;
                    vec![JobTypeConfig::new(task_type, method, path).with_max_retries(max_retries)]
                }
                _ => anyhow::bail!("Either --file or a task type with --path is required"),
            };

            for config in &configs {
                ctx.service.register_job_type(config.clone()).await?;
                if matches!(format, OutputFormat::Table) {
                    output::print_success(&format!(
                        "Registered {} -> {} {}",
                        config.task_type, config.method, config.path_template
                    ));
                }
            }

            if !matches!(format, OutputFormat::Table) {
                output::print_item(&configs, format)?;
            }
        }

        TypeCommands::Show { task_type } => {
            let config = ctx
                .service
                .job_type(&task_type)
                .await?
                .ok_or_else(|| JobqError::job_type_not_found(&task_type))?;
            match format {
                OutputFormat::Table => output::print_list(&[TypeRow::from(&config)], format)?,
                _ => output::print_item(&config, format)?,
            }
        }
    }

    Ok(())
}

fn load_type_file(path: &PathBuf) -> Result<Vec<JobTypeConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_type_entries(&content).with_context(|| format!("Invalid task type file {}", path.display()))
}

fn parse_type_entries(content: &str) -> Result<Vec<JobTypeConfig>> {
    let entries: Vec<TypeEntry> = serde_yaml::from_str(content)?;
    Ok(entries.into_iter().map(JobTypeConfig::from).collect())
}
