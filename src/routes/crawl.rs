use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::error::CrawlError;
use crate::models::job::{JobStatus, JobView};
use crate::models::request::CrawlRequest;

/// POST /api/v1/crawl: admit a signed crawl request and start the run.
pub async fn submit_crawl(
    State(state): State<AppState>,
    Json(request): Json<CrawlRequest>,
) -> Result<(StatusCode, Json<JobView>), CrawlError> {
    let job = state.orchestrator.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// GET /api/v1/crawl/{identity}: job history of an identity.
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<Vec<JobView>>, CrawlError> {
    Ok(Json(state.orchestrator.history(&identity).await?))
}

/// GET /api/v1/crawl/{identity}/{platform}: newest job for the pair.
pub async fn get_job(
    State(state): State<AppState>,
    Path((identity, platform)): Path<(String, String)>,
) -> Result<Json<JobView>, CrawlError> {
    Ok(Json(state.orchestrator.lookup(&identity, &platform).await?))
}

/// POST /api/v1/crawl/{identity}/{platform}/sync: reconcile the pair now.
pub async fn sync_job(
    State(state): State<AppState>,
    Path((identity, platform)): Path<(String, String)>,
) -> Result<Json<JobView>, CrawlError> {
    let status = state.orchestrator.sync_job(&identity, &platform).await?;
    tracing::debug!(%identity, %platform, %status, "Synchronous reconciliation done");
    if status == JobStatus::Missing {
        return Ok(Json(JobView::missing(&identity, &platform)));
    }
    Ok(Json(state.orchestrator.lookup(&identity, &platform).await?))
}
