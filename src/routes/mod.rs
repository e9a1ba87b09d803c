pub mod crawl;
pub mod health;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Health and crawl API routes. Metrics and middleware are added by the binary.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/crawl", post(crawl::submit_crawl))
        .route("/api/v1/crawl/{identity}", get(crawl::list_jobs))
        .route("/api/v1/crawl/{identity}/{platform}", get(crawl::get_job))
        .route("/api/v1/crawl/{identity}/{platform}/sync", post(crawl::sync_job))
        .with_state(state)
}
