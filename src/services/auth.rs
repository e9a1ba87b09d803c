//! Admission checks for crawl requests.
//!
//! A request is admitted when the pair has no pending job and the request was
//! signed by the identity it acts for. The signed content is the request
//! itself, minus `signature` and `publicIdentityDocument`, serialized as JSON
//! with sorted keys and hashed with SHA-256. Fields the service does not
//! know are carried in [`CrawlRequest::extra`] and hashed like the rest.
//!
//! The signer's key comes from the embedded identity document when there is
//! one. Otherwise [`LedgerKeyVerifier`] asks the ledger's identity directory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CrawlError;
use crate::models::request::{CrawlRequest, PublicIdentityDocument, RequestSignature};
use crate::services::job_store::JobStore;
use crate::services::ledger::LedgerError;
use crate::services::platform;

/// Fields left out of the signed content.
const UNSIGNED_FIELDS: [&str; 2] = ["signature", "publicIdentityDocument"];

/// Whose key a signature should be checked against.
#[derive(Debug, Clone, Copy)]
pub enum SignerKey<'a> {
    /// Key embedded in the request.
    Document(&'a PublicIdentityDocument),
    /// Key registered for the identity beforehand.
    Registered(&'a str),
}

/// Checks a signature over a content hash.
///
/// Implementations report anything they cannot verify (unknown identity,
/// malformed key or signature, unreachable key service) as `false`.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify_hash(
        &self,
        signer: SignerKey<'_>,
        content_hash: &str,
        signature: &RequestSignature,
    ) -> bool;
}

/// In-process Ed25519 verifier with an optional registry of known identities.
#[derive(Default)]
pub struct Ed25519Verifier {
    registered: HashMap<String, VerifyingKey>,
}

impl Ed25519Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, identity: &str, key: VerifyingKey) -> Self {
        self.registered.insert(identity.to_string(), key);
        self
    }

    fn resolve(&self, signer: SignerKey<'_>) -> Option<VerifyingKey> {
        match signer {
            SignerKey::Document(doc) => decode_public_key(&doc.public_key),
            SignerKey::Registered(identity) => self.registered.get(identity).copied(),
        }
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519Verifier {
    async fn verify_hash(
        &self,
        signer: SignerKey<'_>,
        content_hash: &str,
        signature: &RequestSignature,
    ) -> bool {
        self.resolve(signer)
            .is_some_and(|key| verify_with(&key, content_hash, signature))
    }
}

/// Verifier for production: registered identities are looked up in the
/// ledger's identity directory at `GET {base}/api/v1/identities/{identity}`,
/// which answers with the identity's public document.
pub struct LedgerKeyVerifier {
    http: Client,
    base_url: String,
}

impl LedgerKeyVerifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn identity_url(&self, identity: &str) -> Option<Url> {
        let mut url = Url::parse(&self.base_url).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["api", "v1", "identities", identity]);
        Some(url)
    }

    async fn registered_key(&self, identity: &str) -> Option<VerifyingKey> {
        let Some(url) = self.identity_url(identity) else {
            tracing::error!(base_url = %self.base_url, "Ledger URL cannot carry an identity path");
            return None;
        };

        let resp = match self.http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(identity, error = %e, "Identity lookup failed");
                return None;
            }
        };
        match resp.status() {
            StatusCode::NOT_FOUND => {
                tracing::debug!(identity, "Identity is not registered with the ledger");
                return None;
            }
            status if !status.is_success() => {
                tracing::warn!(identity, status = status.as_u16(), "Identity lookup rejected");
                return None;
            }
            _ => {}
        }

        let document: PublicIdentityDocument = match resp.json().await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(identity, error = %e, "Unreadable identity document");
                return None;
            }
        };
        if document.id != identity {
            tracing::warn!(identity, document_id = %document.id, "Ledger returned another identity's document");
            return None;
        }
        decode_public_key(&document.public_key)
    }
}

#[async_trait]
impl SignatureVerifier for LedgerKeyVerifier {
    async fn verify_hash(
        &self,
        signer: SignerKey<'_>,
        content_hash: &str,
        signature: &RequestSignature,
    ) -> bool {
        let key = match signer {
            SignerKey::Document(doc) => decode_public_key(&doc.public_key),
            SignerKey::Registered(identity) => self.registered_key(identity).await,
        };
        key.is_some_and(|key| verify_with(&key, content_hash, signature))
    }
}

fn verify_with(key: &VerifyingKey, content_hash: &str, signature: &RequestSignature) -> bool {
    decode_signature(&signature.signature_value)
        .is_some_and(|sig| key.verify(content_hash.as_bytes(), &sig).is_ok())
}

/// Decode a base64 Ed25519 public key.
pub fn decode_public_key(encoded: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = BASE64.decode(encoded.trim()).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn decode_signature(encoded: &str) -> Option<Signature> {
    let bytes = BASE64.decode(encoded.trim()).ok()?;
    Signature::from_slice(&bytes).ok()
}

/// Lowercase hex SHA-256 of the request's signed content.
pub fn content_hash(request: &CrawlRequest) -> Result<String, CrawlError> {
    let mut value = serde_json::to_value(request)
        .map_err(|e| CrawlError::InvalidRequest(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        for field in UNSIGNED_FIELDS {
            map.remove(field);
        }
    }
    // serde_json::Map is a BTreeMap without `preserve_order`, so keys serialize sorted.
    let canonical = value.to_string();
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

/// Admission gate in front of job creation.
pub struct Authenticator {
    store: Arc<dyn JobStore>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn JobStore>, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { store, verifier }
    }

    /// Validate a request without side effects.
    pub async fn validate(&self, request: &CrawlRequest) -> Result<(), CrawlError> {
        let platform = platform::job_key(&request.platform);
        if self.store.count_pending(&request.identity, &platform).await? > 0 {
            return Err(CrawlError::DuplicateJob);
        }

        let hash = content_hash(request)?;
        let signer = match &request.public_identity_document {
            Some(doc) if doc.id != request.identity => {
                tracing::warn!(
                    identity = %request.identity,
                    document_id = %doc.id,
                    "Identity document does not belong to the requesting identity"
                );
                return Err(CrawlError::InvalidSignature);
            }
            Some(doc) => SignerKey::Document(doc),
            None => SignerKey::Registered(&request.identity),
        };

        if !self
            .verifier
            .verify_hash(signer, &hash, &request.signature)
            .await
        {
            tracing::debug!(identity = %request.identity, content_hash = %hash, "Signature verification failed");
            return Err(CrawlError::InvalidSignature);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::Credentials;
    use crate::services::job_store::MemoryJobStore;
    use ed25519_dalek::{Signer as _, SigningKey};
    use serde_json::json;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn unsigned_request(identity: &str) -> CrawlRequest {
        CrawlRequest {
            identity: identity.to_string(),
            platform: "upwork".to_string(),
            url: Some("https://x.test".to_string()),
            credentials: Credentials::default(),
            extra: Default::default(),
            public_identity_document: None,
            signature: RequestSignature {
                signature_value: String::new(),
            },
        }
    }

    fn sign(mut request: CrawlRequest, key: &SigningKey, embed: bool) -> CrawlRequest {
        if embed {
            request.public_identity_document = Some(PublicIdentityDocument {
                id: request.identity.clone(),
                public_key: BASE64.encode(key.verifying_key().to_bytes()),
            });
        }
        let hash = content_hash(&request).unwrap();
        request.signature.signature_value = BASE64.encode(key.sign(hash.as_bytes()).to_bytes());
        request
    }

    fn authenticator(store: Arc<MemoryJobStore>, verifier: Ed25519Verifier) -> Authenticator {
        Authenticator::new(store, Arc::new(verifier))
    }

    #[test]
    fn test_hash_ignores_unsigned_fields() {
        let request = unsigned_request("did:x");
        let signed = sign(request.clone(), &signing_key(), true);
        assert_eq!(content_hash(&request).unwrap(), content_hash(&signed).unwrap());
    }

    #[test]
    fn test_hash_covers_every_other_field() {
        let base = content_hash(&unsigned_request("did:x")).unwrap();

        let mut changed = unsigned_request("did:x");
        changed.url = Some("https://y.test".to_string());
        assert_ne!(content_hash(&changed).unwrap(), base);

        let mut with_login = unsigned_request("did:x");
        with_login.credentials.password = Some("hunter2".to_string());
        assert_ne!(content_hash(&with_login).unwrap(), base);
    }

    #[test]
    fn test_hash_is_sha256_of_sorted_json() {
        let request = unsigned_request("did:x");
        let canonical = r#"{"identity":"did:x","platform":"upwork","url":"https://x.test"}"#;
        let expected = format!("{:x}", Sha256::digest(canonical.as_bytes()));
        assert_eq!(content_hash(&request).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_unknown_signed_fields_are_hashed() {
        let key = signing_key();
        let mut body = json!({
            "identity": "did:x",
            "platform": "upwork",
            "url": "https://x.test",
            "campaign": {"source": "newsletter", "batch": 3},
            "publicIdentityDocument": {
                "id": "did:x",
                "publicKey": BASE64.encode(key.verifying_key().to_bytes())
            }
        });
        // What the client signs: every field except the two unsigned ones, keys sorted.
        let canonical = r#"{"campaign":{"batch":3,"source":"newsletter"},"identity":"did:x","platform":"upwork","url":"https://x.test"}"#;
        let hash = format!("{:x}", Sha256::digest(canonical.as_bytes()));
        body["signature"] = json!({"signatureValue": BASE64.encode(key.sign(hash.as_bytes()).to_bytes())});

        let request: CrawlRequest = serde_json::from_value(body).unwrap();
        assert!(request.extra.contains_key("campaign"));
        assert!(request.credentials.username.is_none());
        assert_eq!(content_hash(&request).unwrap(), hash);

        let auth = authenticator(Arc::new(MemoryJobStore::new()), Ed25519Verifier::new());
        auth.validate(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_embedded_document_signature_is_accepted() {
        let auth = authenticator(Arc::new(MemoryJobStore::new()), Ed25519Verifier::new());
        let request = sign(unsigned_request("did:x"), &signing_key(), true);
        auth.validate(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_registered_key_is_used_without_document() {
        let key = signing_key();
        let verifier = Ed25519Verifier::new().with_key("did:x", key.verifying_key());
        let auth = authenticator(Arc::new(MemoryJobStore::new()), verifier);

        auth.validate(&sign(unsigned_request("did:x"), &key, false))
            .await
            .unwrap();

        let err = auth
            .validate(&sign(unsigned_request("did:unknown"), &key, false))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::InvalidSignature));
    }

    #[tokio::test]
    async fn test_tampered_request_is_rejected() {
        let auth = authenticator(Arc::new(MemoryJobStore::new()), Ed25519Verifier::new());
        let mut request = sign(unsigned_request("did:x"), &signing_key(), true);
        request.url = Some("https://evil.test".to_string());
        assert!(matches!(
            auth.validate(&request).await,
            Err(CrawlError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_foreign_document_is_rejected() {
        let auth = authenticator(Arc::new(MemoryJobStore::new()), Ed25519Verifier::new());
        let mut request = sign(unsigned_request("did:x"), &signing_key(), true);
        if let Some(doc) = request.public_identity_document.as_mut() {
            doc.id = "did:someone-else".to_string();
        }
        assert!(matches!(
            auth.validate(&request).await,
            Err(CrawlError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_garbage_signature_is_invalid_not_an_error() {
        let auth = authenticator(Arc::new(MemoryJobStore::new()), Ed25519Verifier::new());
        let mut request = sign(unsigned_request("did:x"), &signing_key(), true);
        request.signature.signature_value = "%%% not base64".to_string();
        assert!(matches!(
            auth.validate(&request).await,
            Err(CrawlError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_pending_job_is_a_duplicate() {
        let store = Arc::new(MemoryJobStore::new());
        store.create_job("did:x", "upwork").await.unwrap();
        let auth = authenticator(store, Ed25519Verifier::new());

        let request = sign(unsigned_request("did:x"), &signing_key(), true);
        let err = auth.validate(&request).await.unwrap_err();
        assert!(matches!(err, CrawlError::DuplicateJob));
        assert_eq!(
            err.to_string(),
            "an import job for the requested platform is already in progress"
        );
    }
}
