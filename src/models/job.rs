use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of a crawl job.
///
/// `Missing` is what a lookup reports when no record exists for the
/// `(identity, platform)` pair. It is never written to the store.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Missing,
    Created,
    Running,
    Importing,
    Success,
    Error,
}

impl JobStatus {
    /// Statuses that block a new crawl for the same pair.
    pub const PENDING: [JobStatus; 3] = [JobStatus::Created, JobStatus::Running, JobStatus::Importing];

    pub fn is_pending(self) -> bool {
        Self::PENDING.contains(&self)
    }

    /// Whether a persisted job may move from `self` to `next`.
    ///
    /// Staying in `Running` or `Importing` is allowed so that data-only
    /// patches (status snapshots, re-imports) pass through the same check.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Created, Running | Error) => true,
            (Running, Running | Importing | Success | Error) => true,
            (Importing, Importing | Success | Error) => true,
            _ => false,
        }
    }
}

/// Reference to an in-flight actor run on the scraping provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActorRunHandle {
    pub provider_actor_id: String,
    pub provider_run_id: String,
}

impl ActorRunHandle {
    /// Parse a persisted handle, rejecting blank identifiers.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let handle: ActorRunHandle = serde_json::from_value(value.clone()).ok()?;
        if handle.provider_actor_id.trim().is_empty() || handle.provider_run_id.trim().is_empty() {
            return None;
        }
        Some(handle)
    }
}

/// Free-form job data exposed to operators.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct JobData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// Provider response to the start call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawler_run_data: Option<serde_json::Value>,
    /// Latest raw status response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawler_run_status: Option<serde_json::Value>,
    /// Raw fetched items, kept for audit and replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawler_run_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobData {
    /// Shallow merge: every field present in the patch replaces the current one.
    pub fn merge(&mut self, patch: &JobPatch) {
        if let Some(url) = &patch.target_url {
            self.target_url = Some(url.clone());
        }
        if let Some(v) = &patch.crawler_run_data {
            self.crawler_run_data = Some(v.clone());
        }
        if let Some(v) = &patch.crawler_run_status {
            self.crawler_run_status = Some(v.clone());
        }
        if let Some(v) = &patch.crawler_run_result {
            self.crawler_run_result = Some(v.clone());
        }
    }

    /// Provider status string of the last persisted status check, if any.
    pub fn last_provider_status(&self) -> Option<&str> {
        self.crawler_run_status
            .as_ref()
            .and_then(|v| v.pointer("/data/status"))
            .and_then(|v| v.as_str())
    }
}

/// Partial update applied to a pending job.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(skip)]
    pub run_handle: Option<ActorRunHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawler_run_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawler_run_status: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawler_run_result: Option<serde_json::Value>,
}

/// A crawl job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlJob {
    pub id: Uuid,
    pub identity: String,
    pub platform: String,
    pub status: JobStatus,
    /// Raw persisted handle; use [`CrawlJob::actor_run_handle`] to read it.
    pub run_handle: Option<serde_json::Value>,
    pub data: JobData,
    /// Bumped by every write. Updates name the version they read.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlJob {
    pub fn new(identity: &str, platform: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            platform: platform.to_string(),
            status: JobStatus::Created,
            run_handle: None,
            data: JobData::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn actor_run_handle(&self) -> Option<ActorRunHandle> {
        self.run_handle.as_ref().and_then(ActorRunHandle::from_value)
    }
}

/// What a job lookup returns to callers: the newest job for the pair,
/// or the virtual `MISSING` status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub identity: String,
    pub platform: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JobData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobView {
    pub fn missing(identity: &str, platform: &str) -> Self {
        Self {
            identity: identity.to_string(),
            platform: platform.to_string(),
            status: JobStatus::Missing,
            job_id: None,
            data: None,
            updated_at: None,
        }
    }
}

impl From<CrawlJob> for JobView {
    fn from(job: CrawlJob) -> Self {
        Self {
            identity: job.identity,
            platform: job.platform,
            status: job.status,
            job_id: Some(job.id),
            data: Some(job.data),
            updated_at: Some(job.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Created.can_transition_to(Running));
        assert!(Running.can_transition_to(Importing));
        assert!(Running.can_transition_to(Success));
        assert!(Importing.can_transition_to(Success));
        assert!(Importing.can_transition_to(Error));

        assert!(!Running.can_transition_to(Created));
        assert!(!Importing.can_transition_to(Running));
        assert!(!Created.can_transition_to(Importing));
        assert!(!Success.can_transition_to(Error));
        assert!(!Error.can_transition_to(Running));
        assert!(!Created.can_transition_to(Missing));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(JobStatus::Importing.as_ref(), "IMPORTING");
        assert_eq!("RUNNING".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!(serde_json::to_value(JobStatus::Missing).unwrap(), json!("MISSING"));
    }

    #[test]
    fn test_malformed_handle_is_rejected() {
        assert!(ActorRunHandle::from_value(&json!({"providerActorId": "a"})).is_none());
        assert!(ActorRunHandle::from_value(&json!("not a handle")).is_none());
        assert!(ActorRunHandle::from_value(&json!({
            "providerActorId": " ",
            "providerRunId": "r1"
        }))
        .is_none());

        let handle = ActorRunHandle::from_value(&json!({
            "providerActorId": "a",
            "providerRunId": "r1"
        }))
        .unwrap();
        assert_eq!(handle.provider_run_id, "r1");
    }

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let mut data = JobData {
            crawler_run_data: Some(json!({"id": "run-1"})),
            ..Default::default()
        };
        data.merge(&JobPatch {
            crawler_run_result: Some(json!([])),
            ..Default::default()
        });
        assert_eq!(data.crawler_run_data, Some(json!({"id": "run-1"})));
        assert_eq!(data.crawler_run_result, Some(json!([])));
    }

    #[test]
    fn test_last_provider_status() {
        let data = JobData {
            crawler_run_status: Some(json!({"data": {"status": "RUNNING"}})),
            ..Default::default()
        };
        assert_eq!(data.last_provider_status(), Some("RUNNING"));
        assert_eq!(JobData::default().last_provider_status(), None);
    }
}
