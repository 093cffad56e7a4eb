//! jobq CLI - command-line interface for the jobq job queue.
//!
//! Registers task types, enqueues and inspects jobs, and runs one-off
//! maintenance against the job database.

mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{job, job_type, maintenance};
use context::CliContext;
use output::OutputFormat;

/// jobq - persistent job queue CLI
#[derive(Parser)]
#[command(
    name = "jobq",
    version,
    about = "jobq - persistent job queue",
    long_about = "CLI tool for registering task types, enqueueing jobs and maintaining the jobq database.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job operations
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Task type configuration
    #[command(subcommand)]
    Type(job_type::TypeCommands),

    /// Archival, purge and migrations
    #[command(subcommand)]
    Maintenance(maintenance::MaintenanceCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.output;
    let ctx = CliContext::connect(&cli.database_url).await?;

    let result = match cli.command {
        Commands::Job(cmd) => job::execute(cmd, &ctx, format).await,
        Commands::Type(cmd) => job_type::execute(cmd, &ctx, format).await,
        Commands::Maintenance(cmd) => maintenance::execute(cmd, &ctx, format).await,
    };

    ctx.close().await;
    result
}
