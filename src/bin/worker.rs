//! Standalone reconciliation worker.
//!
//! Runs the reconciliation loop without the HTTP API, for deployments that
//! set `EMBEDDED_RECONCILER=false` on the API processes. Requires
//! `DATABASE_URL`: with the in-memory store it would see no jobs.

use review_crawler::{app_state::AppState, config::AppConfig, services::reconciler::Reconciler};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting crawl reconciliation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    if config.database_url.is_none() {
        tracing::error!("DATABASE_URL is required for the standalone worker");
        std::process::exit(1);
    }

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize application state");

    let reconciler = Reconciler::spawn(state.orchestrator.clone(), config.poll_interval());
    tracing::info!(
        interval_secs = config.poll_interval().as_secs(),
        "Worker ready, reconciling pending crawl jobs"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, finishing current pass"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }

    reconciler.shutdown().await;
}
