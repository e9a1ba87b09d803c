//! Background reconciliation of in-flight crawl jobs.
//!
//! One task scans all pending jobs every `interval`. Scans never overlap: a
//! scan that runs long delays the next tick instead of queueing extra ones.
//! Cancellation is observed between scans, so a scan in progress finishes
//! and leaves every job it touched in a consistent state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::services::orchestrator::CrawlOrchestrator;

pub struct Reconciler {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Reconciler {
    /// Start the loop on the current runtime. The first scan runs immediately.
    pub fn spawn(orchestrator: Arc<CrawlOrchestrator>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(orchestrator, interval, cancel.clone()));
        tracing::info!(interval_secs = interval.as_secs(), "Reconciler started");
        Self { cancel, task }
    }

    /// Stop scheduling scans and wait for the current one to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Reconciler task panicked");
        }
        tracing::info!("Reconciler stopped");
    }
}

async fn run(orchestrator: Arc<CrawlOrchestrator>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = orchestrator.sync_all_jobs(None).await;
                if report.failed > 0 {
                    tracing::warn!(
                        scanned = report.scanned,
                        failed = report.failed,
                        "Reconciliation pass finished with failures"
                    );
                }
            }
        }
    }
}
