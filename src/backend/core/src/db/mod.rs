//! Database layer for jobq.
//!
//! Uses PostgreSQL for persistent storage with sqlx. Schema lives in
//! `migrations/` and is embedded at compile time.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Instant;

use crate::config::DatabaseConfig;
use crate::error::{ErrorCode, JobqError, Result};

/// Database connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| {
                JobqError::with_internal(
                    ErrorCode::DatabaseConnectionFailed,
                    "Failed to connect to database",
                    e.to_string(),
                )
                .with_source(e)
            })?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool ready"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| JobqError::from(sqlx::Error::Migrate(Box::new(e))))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Round-trip a trivial query and report its latency.
    pub async fn ping(&self) -> Result<std::time::Duration> {
        let start = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
