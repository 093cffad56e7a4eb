//! Connection to the job store shared by all commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jobq_core::{
    config::DatabaseConfig,
    db::Database,
    jobs::{JobService, PgJobStore},
};

/// Database handle plus the service every command goes through.
pub struct CliContext {
    pub db: Database,
    pub service: JobService,
}

impl CliContext {
    /// Open a small pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let config = DatabaseConfig {
            url: database_url.to_string(),
            max_connections: 2,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            run_migrations: false,
        };
        let db = Database::connect(&config)
            .await
            .context("Failed to connect to the job database")?;
        let service = JobService::new(Arc::new(PgJobStore::from_database(&db)));
        Ok(Self { db, service })
    }

    pub async fn close(self) {
        self.db.pool().close().await;
    }
}
