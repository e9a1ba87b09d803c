use serde::{Deserialize, Serialize};

/// Version marker stamped on every review handed to the ledger.
pub const REVIEW_SCHEMA_VERSION: u32 = 0;

/// Platform-agnostic review record handed to the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CanonicalReview {
    pub subject: ReviewSubject,
    pub platform: PlatformInfo,
    pub author: ReviewAuthor,
    pub review: ReviewBody,
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detailed_review: Vec<DetailedRating>,
    #[serde(default)]
    pub verifiable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
}

impl CanonicalReview {
    /// Attach the requesting identity before import.
    pub fn tag_identity(mut self, identity: &str) -> Self {
        self.subject.did = Some(identity.to_string());
        self.schema_version = Some(REVIEW_SCHEMA_VERSION);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewSubject {
    /// Identity the review is imported for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub telephone: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub location: Option<GeoLocation>,
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoLocation {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlatformInfo {
    pub name: String,
    pub url: String,
    pub subject_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewAuthor {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewBody {
    pub title: Option<String>,
    pub text: Option<String>,
    pub date_published: Option<String>,
    pub url: Option<String>,
}

/// A rating value together with the scale it was given on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub min: f64,
    pub value: Option<f64>,
    pub max: f64,
}

impl Rating {
    pub fn new(min: f64, value: Option<f64>, max: f64) -> Self {
        Self { min, value, max }
    }
}

/// Itemized sub-rating (e.g. "Communication", "Quality").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetailedRating {
    pub rating: Rating,
    pub review_text: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub attribute: String,
}
