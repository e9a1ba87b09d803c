//! Shared fixtures for the crawl integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::{json, Value};

use review_crawler::models::job::{ActorRunHandle, JobStatus};
use review_crawler::models::request::{
    CrawlRequest, Credentials, PublicIdentityDocument, RequestSignature,
};
use review_crawler::models::review::CanonicalReview;
use review_crawler::services::actor::{
    ActorError, ActorRunner, CrawlTarget, RunStatus, RunStatusReport, StartedRun,
};
use review_crawler::services::auth::{content_hash, Ed25519Verifier, SignatureVerifier};
use review_crawler::services::job_store::{JobStore, MemoryJobStore};
use review_crawler::services::ledger::{LedgerError, LedgerImporter};
use review_crawler::services::orchestrator::CrawlOrchestrator;
use review_crawler::services::platform::CrawlerVariant;

pub const IDENTITY: &str = "did:example:alice";
pub const DATASET_ID: &str = "dataset-1";

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub fn public_key_base64() -> String {
    BASE64.encode(signing_key().verifying_key().to_bytes())
}

fn sign(
    identity: &str,
    platform: &str,
    url: Option<&str>,
    credentials: Credentials,
    embed_document: bool,
) -> CrawlRequest {
    let request = CrawlRequest {
        identity: identity.to_string(),
        platform: platform.to_string(),
        url: url.map(str::to_string),
        credentials,
        extra: Default::default(),
        public_identity_document: embed_document.then(|| PublicIdentityDocument {
            id: identity.to_string(),
            public_key: public_key_base64(),
        }),
        signature: RequestSignature {
            signature_value: String::new(),
        },
    };
    resign(request)
}

/// Replace the request's signature with one over its current content.
pub fn resign(mut request: CrawlRequest) -> CrawlRequest {
    let hash = content_hash(&request).expect("hashable request");
    request.signature.signature_value =
        BASE64.encode(signing_key().sign(hash.as_bytes()).to_bytes());
    request
}

/// A request signed with [`signing_key`], carrying its identity document.
pub fn signed_request(
    identity: &str,
    platform: &str,
    url: Option<&str>,
    credentials: Credentials,
) -> CrawlRequest {
    sign(identity, platform, url, credentials, true)
}

/// A yelp request signed with [`signing_key`] but without a document, so
/// the key must come from the identity's registration.
pub fn registered_yelp_request(identity: &str) -> CrawlRequest {
    sign(
        identity,
        "yelp",
        Some("https://www.yelp.com/biz/the-corner-cafe"),
        Credentials::default(),
        false,
    )
}

pub fn yelp_request(identity: &str) -> CrawlRequest {
    signed_request(
        identity,
        "yelp",
        Some("https://www.yelp.com/biz/the-corner-cafe"),
        Credentials::default(),
    )
}

pub fn yelp_items() -> Vec<Value> {
    vec![
        json!({
            "name": "The Corner Cafe",
            "address": "1 Main St",
            "types": ["Cafe", "Breakfast"],
            "latitude": 40.1,
            "longitude": -73.9,
            "url": "https://www.yelp.com/biz/the-corner-cafe",
            "author": "Jo",
            "datePublished": "2024-04-02",
            "rev_url": "https://www.yelp.com/biz/the-corner-cafe?hrid=1",
            "description": "Great coffee.",
            "ratingValue": 5
        }),
        json!({
            "name": "The Corner Cafe",
            "author": "Sam",
            "description": "Slow service.",
            "ratingValue": "2"
        }),
    ]
}

enum Scripted<T> {
    Ok(T),
    Fail(String),
}

/// In-process stand-in for the scraping provider.
///
/// Status checks replay the scripted statuses in order and then repeat the
/// last one. Every call is recorded.
pub struct ScriptedRunner {
    start_error: Mutex<Option<String>>,
    statuses: Mutex<VecDeque<Scripted<String>>>,
    results: Mutex<Scripted<Vec<Value>>>,
    observed_store: Mutex<Option<Arc<dyn JobStore>>>,
    status_delay: Mutex<Option<Duration>>,
    pub starts: Mutex<Vec<(CrawlerVariant, CrawlTarget)>>,
    pub status_during_start: Mutex<Vec<Option<JobStatus>>>,
    pub status_checks: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            start_error: Mutex::new(None),
            statuses: Mutex::new(VecDeque::new()),
            results: Mutex::new(Scripted::Ok(Vec::new())),
            observed_store: Mutex::new(None),
            status_delay: Mutex::new(None),
            starts: Mutex::new(Vec::new()),
            status_during_start: Mutex::new(Vec::new()),
            status_checks: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fail_start(&self, message: &str) {
        *self.start_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn push_status(&self, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Scripted::Ok(status.to_string()));
    }

    pub fn fail_status(&self, message: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.to_string()));
    }

    /// Make every status check take `delay` before answering.
    pub fn delay_status_checks(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_results(&self, items: Vec<Value>) {
        *self.results.lock().unwrap() = Scripted::Ok(items);
    }

    pub fn fail_results(&self, message: &str) {
        *self.results.lock().unwrap() = Scripted::Fail(message.to_string());
    }

    /// Record the pair's job status each time `start` is called.
    pub fn observe(&self, store: Arc<dyn JobStore>) {
        *self.observed_store.lock().unwrap() = Some(store);
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    fn next_status(&self) -> Result<String, String> {
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().map(|s| match s {
                Scripted::Ok(v) => Scripted::Ok(v.clone()),
                Scripted::Fail(m) => Scripted::Fail(m.clone()),
            })
        };
        match next {
            Some(Scripted::Ok(status)) => Ok(status),
            Some(Scripted::Fail(message)) => Err(message),
            None => Ok("RUNNING".to_string()),
        }
    }
}

#[async_trait]
impl ActorRunner for ScriptedRunner {
    async fn start(
        &self,
        variant: CrawlerVariant,
        target: &CrawlTarget,
    ) -> Result<StartedRun, ActorError> {
        let store = self.observed_store.lock().unwrap().clone();
        if let Some(store) = store {
            let platform = variant.platform().to_string();
            let seen = store
                .list_pending_jobs(None)
                .await
                .unwrap()
                .into_iter()
                .find(|j| j.platform == platform)
                .map(|j| j.status);
            self.status_during_start.lock().unwrap().push(seen);
        }

        let run_number = {
            let mut starts = self.starts.lock().unwrap();
            starts.push((variant, target.clone()));
            starts.len()
        };

        if let Some(message) = self.start_error.lock().unwrap().clone() {
            return Err(ActorError::Api {
                status: 503,
                message,
            });
        }

        let run_id = format!("run-{run_number}");
        Ok(StartedRun {
            handle: ActorRunHandle {
                provider_actor_id: variant.actor_id().to_string(),
                provider_run_id: run_id.clone(),
            },
            raw: json!({"data": {"id": run_id, "status": "READY", "defaultDatasetId": DATASET_ID}}),
        })
    }

    async fn check_status(&self, handle: &ActorRunHandle) -> Result<RunStatusReport, ActorError> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let status = self.next_status().map_err(|message| ActorError::Api {
            status: 500,
            message,
        })?;

        Ok(RunStatusReport {
            status: RunStatus::from_provider(&status),
            raw: json!({"data": {
                "id": handle.provider_run_id,
                "status": status,
                "defaultDatasetId": DATASET_ID
            }}),
            provider_status: status,
            result_location: Some(DATASET_ID.to_string()),
        })
    }

    async fn fetch_results(
        &self,
        _handle: &ActorRunHandle,
        result_location: &str,
    ) -> Result<Vec<Value>, ActorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        assert_eq!(result_location, DATASET_ID);
        match &*self.results.lock().unwrap() {
            Scripted::Ok(items) => Ok(items.clone()),
            Scripted::Fail(message) => Err(ActorError::ResultFetch(message.clone())),
        }
    }
}

/// Ledger that keeps every batch it receives.
#[derive(Default)]
pub struct RecordingLedger {
    pub batches: Mutex<Vec<Vec<CanonicalReview>>>,
    reject: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingLedger {
    /// Make every import take `delay`. The batch is recorded when the call starts.
    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn reject_with(&self, message: &str) {
        *self.reject.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl LedgerImporter for RecordingLedger {
    async fn import_reviews(&self, reviews: Vec<CanonicalReview>) -> Result<(), LedgerError> {
        self.batches.lock().unwrap().push(reviews);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.reject.lock().unwrap().clone() {
            Some(message) => Err(LedgerError::Rejected {
                status: 422,
                message,
            }),
            None => Ok(()),
        }
    }
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub runner: Arc<ScriptedRunner>,
    pub ledger: Arc<RecordingLedger>,
    pub orchestrator: Arc<CrawlOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_verifier(Arc::new(Ed25519Verifier::new()))
    }

    pub fn with_verifier(verifier: Arc<dyn SignatureVerifier>) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let runner = Arc::new(ScriptedRunner::new());
        let ledger = Arc::new(RecordingLedger::default());
        let orchestrator = Arc::new(CrawlOrchestrator::new(
            store.clone(),
            runner.clone(),
            ledger.clone(),
            verifier,
        ));
        Self {
            store,
            runner,
            ledger,
            orchestrator,
        }
    }
}
