use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{CrawlJob, JobData, JobStatus};
use crate::services::job_store::StoreError;

const JOB_COLUMNS: &str =
    "id, identity, platform, status, run_handle, data, version, created_at, updated_at";

fn pending_statuses() -> Vec<String> {
    JobStatus::PENDING
        .iter()
        .map(|s| s.as_ref().to_string())
        .collect()
}

fn job_from_row(row: &PgRow) -> Result<CrawlJob, StoreError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{}'", status)))?;
    let data: serde_json::Value = row.try_get("data")?;
    let data: JobData =
        serde_json::from_value(data).map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(CrawlJob {
        id: row.try_get("id")?,
        identity: row.try_get("identity")?,
        platform: row.try_get("platform")?,
        status,
        run_handle: row.try_get("run_handle")?,
        data,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new crawl job in `CREATED`.
///
/// The partial unique index on pending jobs rejects a second pending job for
/// the same pair with a unique violation.
pub async fn create_job(
    pool: &PgPool,
    identity: &str,
    platform: &str,
) -> Result<CrawlJob, StoreError> {
    let job = CrawlJob::new(identity, platform);
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO crawl_jobs (id, identity, platform, status, data, version, created_at, updated_at)
        VALUES ($1, $2, $3, $4, '{{}}'::jsonb, 0, $5, $5)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job.id)
    .bind(identity)
    .bind(platform)
    .bind(JobStatus::Created.as_ref())
    .bind(job.created_at)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Newest job for a pair, terminal or not.
pub async fn get_latest_job(
    pool: &PgPool,
    identity: &str,
    platform: &str,
) -> Result<Option<CrawlJob>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM crawl_jobs
        WHERE identity = $1 AND platform = $2
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(identity)
    .bind(platform)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Job history of an identity, newest first.
pub async fn list_jobs(pool: &PgPool, identity: &str) -> Result<Vec<CrawlJob>, StoreError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM crawl_jobs
        WHERE identity = $1
        ORDER BY created_at DESC
        "#
    ))
    .bind(identity)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Pending jobs (for the reconciliation loop), oldest first.
pub async fn list_pending_jobs(
    pool: &PgPool,
    identity: Option<&str>,
) -> Result<Vec<CrawlJob>, StoreError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM crawl_jobs
        WHERE status = ANY($1) AND ($2::text IS NULL OR identity = $2)
        ORDER BY created_at ASC
        "#
    ))
    .bind(pending_statuses())
    .bind(identity)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Apply a data patch and status change if the row is still at `expected_version`.
///
/// Returns `None` when another writer updated the row first.
pub async fn update_job(
    pool: &PgPool,
    job_id: Uuid,
    expected_version: i64,
    status: JobStatus,
    data_patch: serde_json::Value,
    run_handle: Option<serde_json::Value>,
    error: Option<&str>,
) -> Result<Option<CrawlJob>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE crawl_jobs
        SET status = $3,
            data = CASE WHEN $6::text IS NULL THEN data || $4
                        ELSE data || $4 || jsonb_build_object('error', $6::text) END,
            run_handle = COALESCE($5, run_handle),
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1 AND version = $2
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(expected_version)
    .bind(status.as_ref())
    .bind(data_patch)
    .bind(run_handle)
    .bind(error)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Number of pending jobs for a pair (0 or 1 while the index holds).
pub async fn count_pending(
    pool: &PgPool,
    identity: &str,
    platform: &str,
) -> Result<i64, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS pending
        FROM crawl_jobs
        WHERE identity = $1 AND platform = $2 AND status = ANY($3)
        "#,
    )
    .bind(identity)
    .bind(platform)
    .bind(pending_statuses())
    .fetch_one(pool)
    .await?;

    Ok(row.try_get("pending")?)
}
