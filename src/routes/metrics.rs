use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus scrape endpoint (text exposition format).
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every crawl metric.
pub fn describe() {
    metrics::describe_counter!("crawl_jobs_submitted_total", "Crawl jobs created");
    metrics::describe_counter!(
        "crawl_jobs_rejected_total",
        "Crawl requests rejected before a job was created, by reason"
    );
    metrics::describe_counter!("crawl_jobs_succeeded_total", "Crawl jobs that reached SUCCESS");
    metrics::describe_counter!("crawl_jobs_failed_total", "Crawl jobs that reached ERROR");
    metrics::describe_counter!(
        "crawl_reviews_imported_total",
        "Normalized reviews accepted by the ledger"
    );
    metrics::describe_gauge!(
        "crawl_jobs_pending",
        "Jobs still pending after the last reconciliation pass"
    );
    metrics::describe_histogram!(
        "crawl_reconcile_scan_seconds",
        "Duration of one reconciliation pass"
    );
}
