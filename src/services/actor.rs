//! Client for the scraping provider's asynchronous actor-run API.
//!
//! A crawl is three independent calls: start a run, check its status, fetch
//! its dataset. Nothing here blocks for the duration of a run; callers
//! persist state between the calls and decide when to check again.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::job::ActorRunHandle;
use crate::services::platform::CrawlerVariant;

pub const DEFAULT_BASE_URL: &str = "https://api.apify.com/v2";
const CONSOLE_URL: &str = "https://console.apify.com/actors";

/// What to crawl and with which login.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// A run that the provider accepted.
#[derive(Debug, Clone)]
pub struct StartedRun {
    pub handle: ActorRunHandle,
    /// Provider response body, persisted as `crawlerRunData`.
    pub raw: Value,
}

/// Coarse run status as the orchestrator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "SUCCEEDED" => RunStatus::Succeeded,
            "FAILED" | "ABORTED" | "TIMED-OUT" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

/// Result of a single status check.
#[derive(Debug, Clone)]
pub struct RunStatusReport {
    pub status: RunStatus,
    /// Status string exactly as the provider reported it.
    pub provider_status: String,
    /// Where the results live once the run succeeded (dataset id).
    pub result_location: Option<String>,
    pub raw: Value,
}

/// The provider's start/poll/fetch protocol.
#[async_trait]
pub trait ActorRunner: Send + Sync {
    async fn start(
        &self,
        variant: CrawlerVariant,
        target: &CrawlTarget,
    ) -> Result<StartedRun, ActorError>;

    async fn check_status(&self, handle: &ActorRunHandle) -> Result<RunStatusReport, ActorError>;

    async fn fetch_results(
        &self,
        handle: &ActorRunHandle,
        result_location: &str,
    ) -> Result<Vec<Value>, ActorError>;
}

/// Wrapper for provider API responses.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

/// Actor run metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunData {
    pub id: String,
    pub status: String,
    pub default_dataset_id: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// REST client for the provider.
pub struct ApifyClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ApifyClient {
    pub fn new(token: &str, base_url: &str, timeout: Duration) -> Result<Self, ActorError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn run_url(&self, handle: &ActorRunHandle) -> String {
        format!(
            "{}/acts/{}/runs/{}",
            self.base_url, handle.provider_actor_id, handle.provider_run_id
        )
    }

    /// Parse a run envelope, keeping the raw body for the job record.
    async fn run_envelope(resp: Response) -> Result<(RunData, Value), ActorError> {
        let raw = read_json(resp).await?;
        let envelope: ApiResponse<RunData> =
            serde_json::from_value(raw.clone()).map_err(ActorError::Parse)?;
        Ok((envelope.data, raw))
    }
}

#[async_trait]
impl ActorRunner for ApifyClient {
    async fn start(
        &self,
        variant: CrawlerVariant,
        target: &CrawlTarget,
    ) -> Result<StartedRun, ActorError> {
        let url = format!("{}/acts/{}/runs", self.base_url, variant.actor_id());
        tracing::debug!(actor_id = variant.actor_id(), "Starting actor run");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(target)
            .send()
            .await?;

        let (run, raw) = Self::run_envelope(resp).await?;
        tracing::info!(actor_id = variant.actor_id(), run_id = %run.id, status = %run.status, "Actor run started");

        Ok(StartedRun {
            handle: ActorRunHandle {
                provider_actor_id: variant.actor_id().to_string(),
                provider_run_id: run.id,
            },
            raw,
        })
    }

    async fn check_status(&self, handle: &ActorRunHandle) -> Result<RunStatusReport, ActorError> {
        let resp = self
            .http
            .get(self.run_url(handle))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let (run, raw) = Self::run_envelope(resp).await?;
        let status = RunStatus::from_provider(&run.status);
        if status == RunStatus::Failed {
            tracing::debug!(
                run_id = %run.id,
                finished_at = ?run.finished_at,
                "Actor run reached a failed terminal status"
            );
        }

        Ok(RunStatusReport {
            status,
            provider_status: run.status,
            result_location: run.default_dataset_id,
            raw,
        })
    }

    async fn fetch_results(
        &self,
        handle: &ActorRunHandle,
        result_location: &str,
    ) -> Result<Vec<Value>, ActorError> {
        let url = format!(
            "{}/datasets/{}/items?format=json&clean=true",
            self.base_url, result_location
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ActorError::ResultFetch(e.to_string()))?;

        let body = read_json(resp)
            .await
            .map_err(|e| ActorError::ResultFetch(e.to_string()))?;

        let items = parse_items(body)?;
        tracing::info!(
            run_id = %handle.provider_run_id,
            count = items.len(),
            "Fetched actor run results"
        );
        Ok(items)
    }
}

/// Link to the provider console page of a run, for error messages.
pub fn run_console_url(handle: &ActorRunHandle) -> String {
    format!(
        "{}/{}#/runs/{}",
        CONSOLE_URL, handle.provider_actor_id, handle.provider_run_id
    )
}

/// Read a JSON body, turning non-2xx responses into `ActorError::Api`.
async fn read_json(resp: Response) -> Result<Value, ActorError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| error_message(&v))
            .unwrap_or(body);
        return Err(ActorError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json().await?)
}

/// Dataset payloads are either an array of records or an error envelope.
pub fn parse_items(body: Value) -> Result<Vec<Value>, ActorError> {
    if let Some(message) = error_message(&body) {
        return Err(ActorError::ResultFetch(message));
    }
    match body {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(ActorError::ResultFetch(format!(
            "unexpected result payload of type {}",
            json_type(&other)
        ))),
    }
}

fn error_message(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    match error {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(
            other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse provider response: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("{0}")]
    ResultFetch(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(RunStatus::from_provider("SUCCEEDED"), RunStatus::Succeeded);
        assert_eq!(RunStatus::from_provider("FAILED"), RunStatus::Failed);
        assert_eq!(RunStatus::from_provider("ABORTED"), RunStatus::Failed);
        assert_eq!(RunStatus::from_provider("TIMED-OUT"), RunStatus::Failed);
        assert_eq!(RunStatus::from_provider("READY"), RunStatus::Running);
        assert_eq!(RunStatus::from_provider("TIMING-OUT"), RunStatus::Running);
    }

    #[test]
    fn test_error_envelope_is_a_fetch_error() {
        let err = parse_items(json!({"error": {"type": "record-not-found", "message": "Dataset was not found"}}))
            .unwrap_err();
        assert!(matches!(err, ActorError::ResultFetch(m) if m == "Dataset was not found"));

        let err = parse_items(json!({"error": "boom"})).unwrap_err();
        assert!(matches!(err, ActorError::ResultFetch(m) if m == "boom"));
    }

    #[test]
    fn test_items_payloads() {
        assert_eq!(parse_items(json!([{"a": 1}, {"a": 2}])).unwrap().len(), 2);
        assert!(parse_items(json!(null)).unwrap().is_empty());
        assert!(matches!(parse_items(json!("text")), Err(ActorError::ResultFetch(_))));
    }

    #[test]
    fn test_start_input_omits_absent_fields() {
        let target = CrawlTarget {
            url: Some("https://x.test".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&target).unwrap(), json!({"url": "https://x.test"}));
    }

    #[test]
    fn test_console_url() {
        let handle = ActorRunHandle {
            provider_actor_id: "act".into(),
            provider_run_id: "run".into(),
        };
        assert_eq!(run_console_url(&handle), "https://console.apify.com/actors/act#/runs/run");
    }
}
