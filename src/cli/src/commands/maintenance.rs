//! One-off maintenance: archival, history purge and schema migration.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;

use crate::context::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum MaintenanceCommands {
    /// Move resolved jobs older than the retention window into history
    Archive {
        /// Days a resolved job stays in the active table
        #[arg(long, default_value_t = 7)]
        older_than_days: i64,

        /// Rows moved per transaction
        #[arg(long, default_value_t = 500)]
        batch_size: usize,
    },

    /// Delete history rows archived before the retention window
    Purge {
        /// Days an archived job is kept
        #[arg(long, default_value_t = 90)]
        older_than_days: i64,

        /// Rows deleted per transaction
        #[arg(long, default_value_t = 500)]
        batch_size: usize,
    },

    /// Apply pending schema migrations
    Migrate,
}

#[derive(Serialize)]
struct BatchSummary {
    operation: &'static str,
    rows: u64,
    batches: u32,
}

/// Execute a maintenance subcommand.
pub async fn execute(
    cmd: MaintenanceCommands,
    ctx: &CliContext,
    format: OutputFormat,
) -> Result<()> {
    let summary = match cmd {
        MaintenanceCommands::Archive {
            older_than_days,
            batch_size,
        } => {
            anyhow::ensure!(batch_size > 0, "--batch-size must be positive");
            let cutoff = cutoff(ctx.service.now(), older_than_days)?;
            let mut summary = BatchSummary { operation: "archive", rows: 0, batches: 0 };
            loop {
                let moved = ctx.service.archive_resolved(cutoff, batch_size).await?;
                summary.rows += moved;
                summary.batches += 1;
                if moved < batch_size as u64 {
                    break;
                }
            }
            summary
        }

        MaintenanceCommands::Purge {
            older_than_days,
            batch_size,
        } => {
            anyhow::ensure!(batch_size > 0, "--batch-size must be positive");
            let cutoff = cutoff(ctx.service.now(), older_than_days)?;
            let mut summary = BatchSummary { operation: "purge", rows: 0, batches: 0 };
            loop {
                let purged = ctx.service.purge_history(cutoff, batch_size).await?;
                summary.rows += purged;
                summary.batches += 1;
                if purged < batch_size as u64 {
                    break;
                }
            }
            summary
        }

        MaintenanceCommands::Migrate => {
            ctx.db.migrate().await?;
            if matches!(format, OutputFormat::Table) {
                output::print_success("Migrations applied");
            } else {
                output::print_item(&serde_json::json!({ "operation": "migrate", "ok": true }), format)?;
            }
            return Ok(());
        }
    };

    match format {
        OutputFormat::Table => {
            let verb = if summary.operation == "archive" { "Archived" } else { "Purged" };
            if summary.rows == 0 {
                output::print_info("Nothing to do");
            } else {
                output::print_success(&format!(
                    "{} {} job(s) in {} batch(es)",
                    verb, summary.rows, summary.batches
                ));
            }
        }
        _ => output::print_item(&summary, format)?,
    }

    Ok(())
}

/// `now - days`, rejecting windows chrono cannot represent.
fn cutoff(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    let Some(window) = chrono::Duration::try_days(days) else {
        anyhow::bail!("--older-than-days {} is out of range", days);
    };
    now.checked_sub_signed(window)
        .with_context(|| format!("--older-than-days {} is out of range", days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_rejects_out_of_range() {
        let now = Utc::now();
        assert_eq!(cutoff(now, 7).unwrap(), now - chrono::Duration::days(7));
        assert!(cutoff(now, i64::MAX).is_err());
        assert!(cutoff(now, 1_000_000_000).is_err());
    }
}
