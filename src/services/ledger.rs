use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::models::review::CanonicalReview;

/// Destination for normalized reviews.
#[async_trait]
pub trait LedgerImporter: Send + Sync {
    /// Import a batch of reviews already tagged with their identity.
    async fn import_reviews(&self, reviews: Vec<CanonicalReview>) -> Result<(), LedgerError>;
}

/// Imports reviews through the ledger service's HTTP API.
pub struct HttpLedgerImporter {
    http: Client,
    base_url: String,
}

impl HttpLedgerImporter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LedgerImporter for HttpLedgerImporter {
    async fn import_reviews(&self, reviews: Vec<CanonicalReview>) -> Result<(), LedgerError> {
        let url = format!("{}/api/v1/reviews/import", self.base_url);
        let count = reviews.len();

        let resp = self.http.post(&url).json(&reviews).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        tracing::debug!(count, "Ledger accepted review batch");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ledger rejected the batch ({status}): {message}")]
    Rejected { status: u16, message: String },
}
