use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::{actor::ActorError, job_store::StoreError, ledger::LedgerError};

/// Failures of the crawl subsystem.
///
/// `InvalidRequest`, `InvalidSignature`, `DuplicateJob` and
/// `UnsupportedPlatform` are returned to the submitter before a job exists.
/// Everything else happens after job creation and is recorded on the job.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("invalid crawl request: {0}")]
    InvalidRequest(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("an import job for the requested platform is already in progress")]
    DuplicateJob,

    #[error("unsupported platform '{0}'")]
    UnsupportedPlatform(String),

    #[error("scraping provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("{0}")]
    ProviderRunFailed(String),

    #[error("failed to fetch crawl results: {0}")]
    ResultFetch(String),

    #[error("ledger import failed: {0}")]
    Import(#[from] LedgerError),

    #[error("job store error: {0}")]
    Store(#[from] StoreError),
}

impl CrawlError {
    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            CrawlError::InvalidRequest(_) => "invalid_request",
            CrawlError::InvalidSignature => "invalid_signature",
            CrawlError::DuplicateJob => "duplicate_job",
            CrawlError::UnsupportedPlatform(_) => "unsupported_platform",
            CrawlError::ProviderUnavailable(_) => "provider_unavailable",
            CrawlError::ProviderRunFailed(_) => "provider_run_failed",
            CrawlError::ResultFetch(_) => "result_fetch",
            CrawlError::Import(_) => "import",
            CrawlError::Store(_) => "store",
        }
    }
}

impl From<ActorError> for CrawlError {
    fn from(err: ActorError) -> Self {
        match err {
            ActorError::ResultFetch(msg) => CrawlError::ResultFetch(msg),
            other => CrawlError::ProviderUnavailable(other.to_string()),
        }
    }
}

impl CrawlError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CrawlError::InvalidRequest(_) | CrawlError::UnsupportedPlatform(_) => {
                StatusCode::BAD_REQUEST
            }
            CrawlError::InvalidSignature => StatusCode::UNAUTHORIZED,
            CrawlError::DuplicateJob => StatusCode::CONFLICT,
            CrawlError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for CrawlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_errors_map_to_client_statuses() {
        assert_eq!(CrawlError::InvalidRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(CrawlError::UnsupportedPlatform("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(CrawlError::InvalidSignature.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(CrawlError::DuplicateJob.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_job_failures_map_to_server_statuses() {
        assert_eq!(
            CrawlError::ProviderUnavailable("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            CrawlError::ResultFetch("gone".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_actor_errors_keep_their_category() {
        let err: CrawlError = ActorError::ResultFetch("dataset gone".into()).into();
        assert!(matches!(err, CrawlError::ResultFetch(m) if m == "dataset gone"));

        let err: CrawlError = ActorError::Api {
            status: 503,
            message: "maintenance".into(),
        }
        .into();
        assert_eq!(err.reason(), "provider_unavailable");
    }
}
