//! Durable record of crawl jobs keyed by `(identity, platform)`.
//!
//! Invariant: at most one pending (`CREATED`, `RUNNING`, `IMPORTING`) job per
//! pair. `create_job` enforces it. Every update is a compare-and-swap on the
//! version of the job the caller read, so two writers holding the same
//! snapshot cannot both apply their change.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::{CrawlJob, JobPatch, JobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `CREATED`. Fails with `Conflict` if the pair already has a pending job.
    async fn create_job(&self, identity: &str, platform: &str) -> Result<CrawlJob, StoreError>;

    /// Newest job for the pair, terminal or not.
    async fn get_job(&self, identity: &str, platform: &str) -> Result<Option<CrawlJob>, StoreError>;

    /// All jobs of an identity, newest first.
    async fn list_jobs(&self, identity: &str) -> Result<Vec<CrawlJob>, StoreError>;

    /// Pending jobs, oldest first, optionally scoped to one identity.
    async fn list_pending_jobs(&self, identity: Option<&str>) -> Result<Vec<CrawlJob>, StoreError>;

    /// Merge `patch` into `job` and optionally move it to `new_status`.
    ///
    /// Fails with `Stale` if the stored job is no longer the version the
    /// caller read.
    async fn update_job(
        &self,
        job: &CrawlJob,
        patch: JobPatch,
        new_status: Option<JobStatus>,
    ) -> Result<CrawlJob, StoreError>;

    /// Move `job` to `ERROR` with `message`, under the same version check.
    async fn set_job_error(&self, job: &CrawlJob, message: &str) -> Result<CrawlJob, StoreError>;

    async fn count_pending(&self, identity: &str, platform: &str) -> Result<i64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a pending job already exists for {identity}/{platform}")]
    Conflict { identity: String, platform: String },

    #[error("job {job_id} does not exist")]
    NotFound { job_id: Uuid },

    /// Another writer updated the job after the caller read it.
    #[error("job {job_id} changed since version {version} was read")]
    Stale { job_id: Uuid, version: i64 },

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("corrupt job record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    fn conflict(identity: &str, platform: &str) -> Self {
        StoreError::Conflict {
            identity: identity.to_string(),
            platform: platform.to_string(),
        }
    }

    fn stale(job: &CrawlJob) -> Self {
        StoreError::Stale {
            job_id: job.id,
            version: job.version,
        }
    }
}

/// Status `job` ends up in after an update requesting `new_status`.
///
/// Data-only updates are allowed on pending jobs. Terminal jobs are frozen.
fn next_status(job: &CrawlJob, new_status: Option<JobStatus>) -> Result<JobStatus, StoreError> {
    let next = new_status.unwrap_or(job.status);
    if (next == job.status && job.status.is_pending()) || job.status.can_transition_to(next) {
        Ok(next)
    } else {
        Err(StoreError::InvalidTransition {
            job_id: job.id,
            from: job.status,
            to: next,
        })
    }
}

/// Process-local store. Suitable for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<CrawlJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job as-is, bypassing admission. Used to seed fixtures.
    pub fn insert(&self, job: CrawlJob) {
        self.lock().push(job);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CrawlJob>> {
        // Updates never leave a job half-written, so a poisoned lock is still consistent.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn has_pending(jobs: &[CrawlJob], identity: &str, platform: &str) -> bool {
        jobs.iter()
            .any(|j| j.identity == identity && j.platform == platform && j.status.is_pending())
    }

    /// Apply a write to the stored copy of `seen` if nobody changed it since.
    fn swap(
        &self,
        seen: &CrawlJob,
        patch: &JobPatch,
        new_status: Option<JobStatus>,
        error: Option<&str>,
    ) -> Result<CrawlJob, StoreError> {
        let mut jobs = self.lock();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == seen.id)
            .ok_or(StoreError::NotFound { job_id: seen.id })?;
        if job.version != seen.version {
            return Err(StoreError::stale(seen));
        }
        let next = next_status(job, new_status)?;

        job.data.merge(patch);
        if let Some(handle) = &patch.run_handle {
            job.run_handle = Some(
                serde_json::to_value(handle).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            );
        }
        if let Some(message) = error {
            job.data.error = Some(message.to_string());
        }
        job.status = next;
        job.version += 1;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, identity: &str, platform: &str) -> Result<CrawlJob, StoreError> {
        let mut jobs = self.lock();
        if Self::has_pending(&jobs, identity, platform) {
            return Err(StoreError::conflict(identity, platform));
        }
        let job = CrawlJob::new(identity, platform);
        jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, identity: &str, platform: &str) -> Result<Option<CrawlJob>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .rev()
            .find(|j| j.identity == identity && j.platform == platform)
            .cloned())
    }

    async fn list_jobs(&self, identity: &str) -> Result<Vec<CrawlJob>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .rev()
            .filter(|j| j.identity == identity)
            .cloned()
            .collect())
    }

    async fn list_pending_jobs(&self, identity: Option<&str>) -> Result<Vec<CrawlJob>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|j| j.status.is_pending())
            .filter(|j| identity.map_or(true, |id| j.identity == id))
            .cloned()
            .collect())
    }

    async fn update_job(
        &self,
        job: &CrawlJob,
        patch: JobPatch,
        new_status: Option<JobStatus>,
    ) -> Result<CrawlJob, StoreError> {
        self.swap(job, &patch, new_status, None)
    }

    async fn set_job_error(&self, job: &CrawlJob, message: &str) -> Result<CrawlJob, StoreError> {
        self.swap(job, &JobPatch::default(), Some(JobStatus::Error), Some(message))
    }

    async fn count_pending(&self, identity: &str, platform: &str) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|j| j.identity == identity && j.platform == platform && j.status.is_pending())
            .count() as i64)
    }
}

/// Postgres-backed store. Uniqueness of pending jobs is enforced by a
/// partial unique index, so concurrent API processes stay consistent.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Compare-and-swap on the version the caller read.
    async fn swap(
        &self,
        seen: &CrawlJob,
        patch: &JobPatch,
        new_status: Option<JobStatus>,
        error: Option<&str>,
    ) -> Result<CrawlJob, StoreError> {
        let next = next_status(seen, new_status)?;

        let data_patch =
            serde_json::to_value(patch).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let run_handle = patch
            .run_handle
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        queries::update_job(
            &self.pool,
            seen.id,
            seen.version,
            next,
            data_patch,
            run_handle,
            error,
        )
        .await?
        .ok_or_else(|| StoreError::stale(seen))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, identity: &str, platform: &str) -> Result<CrawlJob, StoreError> {
        match queries::create_job(&self.pool, identity, platform).await {
            Err(StoreError::Database(sqlx::Error::Database(e))) if e.is_unique_violation() => {
                Err(StoreError::conflict(identity, platform))
            }
            other => other,
        }
    }

    async fn get_job(&self, identity: &str, platform: &str) -> Result<Option<CrawlJob>, StoreError> {
        queries::get_latest_job(&self.pool, identity, platform).await
    }

    async fn list_jobs(&self, identity: &str) -> Result<Vec<CrawlJob>, StoreError> {
        queries::list_jobs(&self.pool, identity).await
    }

    async fn list_pending_jobs(&self, identity: Option<&str>) -> Result<Vec<CrawlJob>, StoreError> {
        queries::list_pending_jobs(&self.pool, identity).await
    }

    async fn update_job(
        &self,
        job: &CrawlJob,
        patch: JobPatch,
        new_status: Option<JobStatus>,
    ) -> Result<CrawlJob, StoreError> {
        self.swap(job, &patch, new_status, None).await
    }

    async fn set_job_error(&self, job: &CrawlJob, message: &str) -> Result<CrawlJob, StoreError> {
        self.swap(job, &JobPatch::default(), Some(JobStatus::Error), Some(message))
            .await
    }

    async fn count_pending(&self, identity: &str, platform: &str) -> Result<i64, StoreError> {
        queries::count_pending(&self.pool, identity, platform).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
