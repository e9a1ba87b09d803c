//! Crawl job coordination.
//!
//! `submit` admits a request, creates the job and starts the provider run,
//! then returns. Everything after that is driven by reconciliation passes
//! ([`CrawlOrchestrator::sync_all_jobs`]), which read and write job state only
//! through the [`JobStore`]:
//!
//! ```text
//! ∅ ─submit─► CREATED ─start ok─► RUNNING ─SUCCEEDED, items─► IMPORTING ─import ok─► SUCCESS
//!                │                   │ └─SUCCEEDED, no items──────────────────────► SUCCESS
//!                └─start failed──────┴─FAILED / any error────────────────────────► ERROR
//! ```
//!
//! Several passes may look at the same job at once (the embedded loop, a
//! standalone worker, `POST .../sync`). Every write names the job version it
//! was based on, so exactly one of them wins each step. In particular only
//! the pass that moves a job into `IMPORTING` calls the ledger. An
//! `IMPORTING` job is imported again only after its import lease expires,
//! which covers a process that died mid-import.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use garde::Validate;
use serde::Serialize;
use serde_json::Value;

use crate::error::CrawlError;
use crate::models::job::{ActorRunHandle, CrawlJob, JobPatch, JobStatus, JobView};
use crate::models::request::CrawlRequest;
use crate::models::review::CanonicalReview;
use crate::services::actor::{run_console_url, ActorRunner, CrawlTarget, RunStatus, RunStatusReport};
use crate::services::auth::{Authenticator, SignatureVerifier};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::ledger::LedgerImporter;
use crate::services::normalize::normalize;
use crate::services::platform::{self, CrawlerVariant};

/// What a reconciliation pass did to one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Provider status matches the last observation.
    Unchanged,
    /// New provider snapshot persisted, job still in flight.
    Refreshed,
    /// Job has no usable run handle and was left alone.
    Skipped,
    /// Job reached a terminal status.
    Finished(JobStatus),
    /// Another pass changed the job first and owns this step.
    Superseded,
}

/// How long an `IMPORTING` job is left to the pass that claimed it.
pub const DEFAULT_IMPORT_LEASE: Duration = Duration::from_secs(600);

/// Outcome of one pass over all pending jobs.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub scanned: usize,
    pub advanced: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct CrawlOrchestrator {
    store: Arc<dyn JobStore>,
    actors: Arc<dyn ActorRunner>,
    ledger: Arc<dyn LedgerImporter>,
    authenticator: Authenticator,
    import_lease: Duration,
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        actors: Arc<dyn ActorRunner>,
        ledger: Arc<dyn LedgerImporter>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        let authenticator = Authenticator::new(store.clone(), verifier);
        Self {
            store,
            actors,
            ledger,
            authenticator,
            import_lease: DEFAULT_IMPORT_LEASE,
        }
    }

    pub fn with_import_lease(mut self, lease: Duration) -> Self {
        self.import_lease = lease;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Admit a crawl request and start its provider run.
    ///
    /// Returns once the run has started (job in `RUNNING`). A failed start
    /// leaves the job in `ERROR` and is returned to the caller.
    pub async fn submit(&self, request: CrawlRequest) -> Result<CrawlJob, CrawlError> {
        let variant = match self.admit(&request).await {
            Ok(variant) => variant,
            Err(err) => {
                metrics::counter!("crawl_jobs_rejected_total", "reason" => err.reason()).increment(1);
                tracing::info!(
                    identity = %request.identity,
                    platform = %request.platform,
                    reason = err.reason(),
                    "Crawl request rejected"
                );
                return Err(err);
            }
        };

        let identity = request.identity.as_str();
        let platform = variant.platform().to_string();

        let job = self
            .store
            .create_job(identity, &platform)
            .await
            .map_err(|e| match e {
                StoreError::Conflict { .. } => CrawlError::DuplicateJob,
                other => CrawlError::Store(other),
            })?;
        metrics::counter!("crawl_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job.id, identity, platform = %platform, ?variant, "Crawl job created");

        let target = CrawlTarget {
            url: request.url.clone(),
            login: request.credentials.username.clone(),
            pass: request.credentials.password.clone(),
            secret: request.credentials.secret.clone(),
        };

        let started = match self.actors.start(variant, &target).await {
            Ok(started) => started,
            Err(e) => {
                let err = CrawlError::ProviderUnavailable(e.to_string());
                let _ = self.fail_job(&job, &err).await;
                return Err(err);
            }
        };

        let patch = JobPatch {
            run_handle: Some(started.handle),
            target_url: request.url.clone(),
            crawler_run_data: Some(started.raw),
            ..Default::default()
        };
        match self
            .store
            .update_job(&job, patch, Some(JobStatus::Running))
            .await
        {
            Ok(running) => {
                log_transition(&running, JobStatus::Created, JobStatus::Running);
                Ok(running)
            }
            Err(e) => {
                let err = CrawlError::Store(e);
                let _ = self.fail_job(&job, &err).await;
                Err(err)
            }
        }
    }

    /// Checks that must pass before a job exists.
    async fn admit(&self, request: &CrawlRequest) -> Result<CrawlerVariant, CrawlError> {
        request
            .validate()
            .map_err(|e| CrawlError::InvalidRequest(e.to_string()))?;

        let variant = CrawlerVariant::route_name(&request.platform, &request.credentials)?;
        if variant.requires_url() && request.url.is_none() {
            return Err(CrawlError::InvalidRequest(format!(
                "missing 'url' for platform {}",
                variant.platform()
            )));
        }

        self.authenticator.validate(request).await?;
        Ok(variant)
    }

    /// Newest job for the pair, or `MISSING`.
    pub async fn lookup(&self, identity: &str, platform: &str) -> Result<JobView, CrawlError> {
        let platform = platform::job_key(platform);
        Ok(match self.store.get_job(identity, &platform).await? {
            Some(job) => job.into(),
            None => JobView::missing(identity, &platform),
        })
    }

    /// Job history of an identity, newest first.
    pub async fn history(&self, identity: &str) -> Result<Vec<JobView>, CrawlError> {
        let jobs = self.store.list_jobs(identity).await?;
        Ok(jobs.into_iter().map(JobView::from).collect())
    }

    /// Reconcile the pair's pending job right now.
    ///
    /// Unlike the background pass, failures are returned to the caller
    /// (after being recorded on the job).
    pub async fn sync_job(&self, identity: &str, platform: &str) -> Result<JobStatus, CrawlError> {
        let platform = platform::job_key(platform);
        let Some(job) = self.store.get_job(identity, &platform).await? else {
            return Ok(JobStatus::Missing);
        };
        if !job.status.is_pending() {
            return Ok(job.status);
        }

        Ok(match self.reconcile(&job).await? {
            Reconciled::Finished(status) => status,
            Reconciled::Superseded => self
                .store
                .get_job(identity, &platform)
                .await?
                .map_or(JobStatus::Missing, |latest| latest.status),
            _ => job.status,
        })
    }

    /// One reconciliation pass over every pending job, one at a time.
    ///
    /// Never fails: per-job errors are recorded on the job and logged. Jobs
    /// another pass moved first count as skipped.
    pub async fn sync_all_jobs(&self, identity: Option<&str>) -> SyncReport {
        let started = Instant::now();
        let mut report = SyncReport::default();

        let jobs = match self.store.list_pending_jobs(identity).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list pending crawl jobs");
                return report;
            }
        };

        report.scanned = jobs.len();
        let mut still_pending = jobs.len();
        for job in &jobs {
            match self.reconcile(job).await {
                Ok(Reconciled::Unchanged) => report.unchanged += 1,
                Ok(Reconciled::Skipped | Reconciled::Superseded) => report.skipped += 1,
                Ok(Reconciled::Refreshed) => report.advanced += 1,
                Ok(Reconciled::Finished(_)) => {
                    report.advanced += 1;
                    still_pending -= 1;
                }
                Err(e) => {
                    report.failed += 1;
                    if self.left_pending(job).await {
                        tracing::warn!(job_id = %job.id, "Failed job could not be closed, still pending");
                    } else {
                        still_pending -= 1;
                    }
                    tracing::error!(
                        job_id = %job.id,
                        identity = %job.identity,
                        platform = %job.platform,
                        error = %e,
                        "Crawl job reconciliation failed"
                    );
                }
            }
        }

        metrics::gauge!("crawl_jobs_pending").set(still_pending as f64);
        metrics::histogram!("crawl_reconcile_scan_seconds").record(started.elapsed().as_secs_f64());
        if report.scanned > 0 {
            tracing::debug!(?report, "Reconciliation pass complete");
        }
        report
    }

    /// Whether `job` is still pending after a failed reconcile, i.e. the
    /// error could not be recorded. Unknown counts as pending.
    async fn left_pending(&self, job: &CrawlJob) -> bool {
        match self.store.get_job(&job.identity, &job.platform).await {
            Ok(Some(latest)) => latest.id == job.id && latest.status.is_pending(),
            Ok(None) => false,
            Err(_) => true,
        }
    }

    /// Whether the pass that moved `job` into `IMPORTING` has had its chance.
    fn import_lease_expired(&self, job: &CrawlJob) -> bool {
        Utc::now()
            .signed_duration_since(job.updated_at)
            .to_std()
            .is_ok_and(|age| age >= self.import_lease)
    }

    /// Check one job's run and move it forward.
    async fn reconcile(&self, job: &CrawlJob) -> Result<Reconciled, CrawlError> {
        let Some(handle) = job.actor_run_handle() else {
            tracing::warn!(
                job_id = %job.id,
                identity = %job.identity,
                platform = %job.platform,
                status = %job.status,
                "Job has no usable run handle, leaving it untouched"
            );
            return Ok(Reconciled::Skipped);
        };
        let Some(variant) = CrawlerVariant::from_actor_id(&handle.provider_actor_id) else {
            tracing::warn!(
                job_id = %job.id,
                actor_id = %handle.provider_actor_id,
                "Job references an unknown actor, leaving it untouched"
            );
            return Ok(Reconciled::Skipped);
        };
        if job.status == JobStatus::Importing && !self.import_lease_expired(job) {
            tracing::debug!(job_id = %job.id, "Import in progress elsewhere");
            return Ok(Reconciled::Unchanged);
        }

        let report = match self.actors.check_status(&handle).await {
            Ok(report) => report,
            Err(e) => {
                return self
                    .fail(job, CrawlError::ProviderUnavailable(e.to_string()))
                    .await
            }
        };

        match report.status {
            RunStatus::Running => {
                if job.status == JobStatus::Running
                    && job.data.last_provider_status() == Some(report.provider_status.as_str())
                {
                    tracing::debug!(job_id = %job.id, status = %report.provider_status, "Run status unchanged");
                    return Ok(Reconciled::Unchanged);
                }
                let patch = JobPatch {
                    crawler_run_status: Some(report.raw),
                    ..Default::default()
                };
                match self.store.update_job(job, patch, None).await {
                    Ok(_) => {
                        tracing::debug!(job_id = %job.id, status = %report.provider_status, "Run status refreshed");
                        Ok(Reconciled::Refreshed)
                    }
                    Err(StoreError::Stale { .. }) => Ok(superseded(job)),
                    Err(e) => Err(e.into()),
                }
            }
            RunStatus::Failed => {
                let err = CrawlError::ProviderRunFailed(format!(
                    "Actor run failed with status '{}'. See {} for details.",
                    report.provider_status,
                    run_console_url(&handle)
                ));
                let patch = JobPatch {
                    crawler_run_status: Some(report.raw),
                    ..Default::default()
                };
                match self.store.update_job(job, patch, None).await {
                    Ok(updated) => self.fail(&updated, err).await,
                    Err(StoreError::Stale { .. }) => Ok(superseded(job)),
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to persist final run status");
                        self.fail(job, err).await
                    }
                }
            }
            RunStatus::Succeeded => {
                let mut current = job.clone();
                match self
                    .import_results(&mut current, variant, &handle, report)
                    .await
                {
                    Ok(status) => Ok(Reconciled::Finished(status)),
                    Err(CrawlError::Store(StoreError::Stale { .. })) => Ok(superseded(job)),
                    Err(err) => self.fail(&current, err).await,
                }
            }
        }
    }

    /// Fetch, normalize and import the results of a succeeded run.
    ///
    /// `job` tracks the latest version written here, so a failure is
    /// recorded against the right one.
    async fn import_results(
        &self,
        job: &mut CrawlJob,
        variant: CrawlerVariant,
        handle: &ActorRunHandle,
        report: RunStatusReport,
    ) -> Result<JobStatus, CrawlError> {
        let observed = job.status;

        let location = report.result_location.as_deref().ok_or_else(|| {
            CrawlError::ResultFetch("provider reported no result location for the run".into())
        })?;
        let items = self
            .actors
            .fetch_results(handle, location)
            .await
            .map_err(|e| CrawlError::ResultFetch(e.to_string()))?;

        let reviews: Vec<CanonicalReview> =
            normalize(variant, &items, job.data.target_url.as_deref())
                .into_iter()
                .map(|review| review.tag_identity(&job.identity))
                .collect();

        let patch = JobPatch {
            crawler_run_status: Some(report.raw),
            crawler_run_result: Some(Value::Array(items)),
            ..Default::default()
        };

        if reviews.is_empty() {
            let done = self
                .store
                .update_job(job, patch, Some(JobStatus::Success))
                .await?;
            *job = done;
            log_transition(job, observed, JobStatus::Success);
            metrics::counter!("crawl_jobs_succeeded_total").increment(1);
            return Ok(JobStatus::Success);
        }

        // The claim: whoever lands this write is the only importer.
        let claimed = self
            .store
            .update_job(job, patch, Some(JobStatus::Importing))
            .await?;
        *job = claimed;
        if observed == JobStatus::Importing {
            tracing::warn!(job_id = %job.id, "Import lease expired, importing results again");
        } else {
            log_transition(job, observed, JobStatus::Importing);
        }

        let count = reviews.len();
        self.ledger.import_reviews(reviews).await?;

        let done = self
            .store
            .update_job(job, JobPatch::default(), Some(JobStatus::Success))
            .await?;
        *job = done;
        log_transition(job, JobStatus::Importing, JobStatus::Success);
        metrics::counter!("crawl_jobs_succeeded_total").increment(1);
        metrics::counter!("crawl_reviews_imported_total").increment(count as u64);
        Ok(JobStatus::Success)
    }

    /// Record `err` on `job` and return it, unless another pass moved the
    /// job first, in which case the failure is not ours to report.
    async fn fail(&self, job: &CrawlJob, err: CrawlError) -> Result<Reconciled, CrawlError> {
        match self.fail_job(job, &err).await {
            Err(StoreError::Stale { .. }) => Ok(superseded(job)),
            _ => Err(err),
        }
    }

    /// Move `job` to `ERROR` with the failure message.
    async fn fail_job(&self, job: &CrawlJob, err: &CrawlError) -> Result<(), StoreError> {
        match self.store.set_job_error(job, &err.to_string()).await {
            Ok(_) => {
                metrics::counter!("crawl_jobs_failed_total").increment(1);
                tracing::error!(
                    job_id = %job.id,
                    identity = %job.identity,
                    platform = %job.platform,
                    error = %err,
                    reason = err.reason(),
                    "Crawl job failed"
                );
                Ok(())
            }
            Err(e @ StoreError::Stale { .. }) => {
                tracing::info!(job_id = %job.id, error = %err, "Job moved on before the failure was recorded");
                Err(e)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %err, store_error = %e, "Failed to record crawl job error");
                Err(e)
            }
        }
    }
}

fn superseded(job: &CrawlJob) -> Reconciled {
    tracing::debug!(job_id = %job.id, status = %job.status, "Job changed under this pass, leaving it to the other writer");
    Reconciled::Superseded
}

fn log_transition(job: &CrawlJob, from: JobStatus, to: JobStatus) {
    tracing::info!(
        job_id = %job.id,
        identity = %job.identity,
        platform = %job.platform,
        %from,
        %to,
        "Crawl job transition"
    );
}
