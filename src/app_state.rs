use std::sync::Arc;

use crate::config::AppConfig;
use crate::db;
use crate::services::{
    actor::{ActorError, ApifyClient},
    auth::LedgerKeyVerifier,
    job_store::{JobStore, MemoryJobStore, PgJobStore},
    ledger::{HttpLedgerImporter, LedgerError},
    orchestrator::CrawlOrchestrator,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CrawlOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<CrawlOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        self.orchestrator.store()
    }

    /// Wire the orchestrator and its collaborators from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let store: Arc<dyn JobStore> = match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL database");
                let pool = db::init_pool(url, config.database_max_connections).await?;
                tracing::info!("Running database migrations");
                db::run_migrations(&pool).await?;
                Arc::new(PgJobStore::new(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, crawl jobs are kept in memory");
                Arc::new(MemoryJobStore::new())
            }
        };

        tracing::info!(base_url = %config.apify_base_url, "Initializing scraping provider client");
        let actors = ApifyClient::new(
            &config.apify_token,
            &config.apify_base_url,
            config.http_timeout(),
        )?;

        tracing::info!(ledger_url = %config.ledger_url, "Initializing ledger importer");
        let ledger = HttpLedgerImporter::new(&config.ledger_url, config.http_timeout())?;
        let verifier = LedgerKeyVerifier::new(&config.ledger_url, config.http_timeout())?;

        let orchestrator = CrawlOrchestrator::new(
            store,
            Arc::new(actors),
            Arc::new(ledger),
            Arc::new(verifier),
        )
        .with_import_lease(config.import_lease());
        Ok(Self::new(Arc::new(orchestrator)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Provider client error: {0}")]
    Provider(#[from] ActorError),

    #[error("Ledger client error: {0}")]
    Ledger(#[from] LedgerError),
}
