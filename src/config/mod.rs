use std::time::Duration;

use serde::Deserialize;

use crate::services::actor::DEFAULT_BASE_URL;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3006"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Without it jobs live in process memory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Upper bound of the Postgres pool
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Scraping provider API token
    pub apify_token: String,

    /// Scraping provider API root
    #[serde(default = "default_apify_base_url")]
    pub apify_base_url: String,

    /// Base URL of the review ledger service
    pub ledger_url: String,

    /// Seconds between reconciliation passes
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Run the reconciliation loop inside the API process
    #[serde(default = "default_embedded_reconciler")]
    pub embedded_reconciler: bool,

    /// Timeout for provider and ledger HTTP calls
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Seconds an `IMPORTING` job is left to the pass that claimed it
    /// before another pass may import it again
    #[serde(default = "default_import_lease_secs")]
    pub import_lease_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3006".to_string()
}

fn default_apify_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_embedded_reconciler() -> bool {
    true
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_import_lease_secs() -> u64 {
    600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Never shorter than the HTTP timeout, so a live import keeps its claim.
    pub fn import_lease(&self) -> Duration {
        Duration::from_secs(self.import_lease_secs).max(self.http_timeout())
    }
}
