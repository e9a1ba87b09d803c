//! Postgres plumbing for the job store: pool and embedded migrations.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Initialize the PostgreSQL pool shared by API handlers and the reconciler.
///
/// One connection is kept warm so the health check and the first
/// reconciliation pass do not pay for a handshake.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Create or upgrade the `crawl_jobs` table and its pending-job indexes.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod queries;
