use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Signed request to import reviews from a platform on behalf of an identity.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    #[garde(length(min = 1, max = 512))]
    pub identity: String,

    #[garde(length(min = 1, max = 64))]
    pub platform: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(url)]
    pub url: Option<String>,

    #[serde(flatten)]
    #[garde(skip)]
    pub credentials: Credentials,

    /// Top-level fields this service does not interpret. They are part of
    /// the signed content, so they are kept for hashing.
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub public_identity_document: Option<PublicIdentityDocument>,

    #[garde(skip)]
    pub signature: RequestSignature,
}

/// Platform login data forwarded to the actor. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Credentials {
    /// Whether the caller supplied a login at all.
    pub fn is_supplied(&self) -> bool {
        self.username
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}

/// Public half of an identity, embedded by callers that are not registered yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIdentityDocument {
    pub id: String,
    /// Base64-encoded Ed25519 public key.
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSignature {
    /// Base64-encoded Ed25519 signature over the request content hash.
    pub signature_value: String,
}
