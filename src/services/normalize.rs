//! Mapping of raw actor output into [`CanonicalReview`] records.
//!
//! Every mapping is total: a missing or mistyped field becomes `None`, an
//! empty string or an empty list, never an error. Output index `i` always
//! corresponds to input record `i`.

use serde_json::Value;

use crate::models::review::{
    CanonicalReview, DetailedRating, GeoLocation, PlatformInfo, Rating, ReviewAuthor, ReviewBody,
    ReviewSubject,
};
use crate::services::platform::{CrawlerVariant, RecordFormat};

const RATING_MIN: f64 = 1.0;
const RATING_MAX: f64 = 5.0;
const DETAIL_RATING_MIN: f64 = 0.0;

/// Normalize a batch of raw records produced by `variant`'s actor.
///
/// `profile_url` is the crawl target, used where the actor does not echo it back.
pub fn normalize(
    variant: CrawlerVariant,
    items: &[Value],
    profile_url: Option<&str>,
) -> Vec<CanonicalReview> {
    let map: fn(&Value, CrawlerVariant, Option<&str>) -> CanonicalReview = match variant.record_format() {
        RecordFormat::Yelp => yelp_review,
        RecordFormat::Tripadvisor => tripadvisor_review,
        RecordFormat::UpworkLegacy => upwork_legacy_review,
        RecordFormat::ActorCanonical => actor_canonical_review,
    };
    items.iter().map(|item| map(item, variant, profile_url)).collect()
}

fn yelp_review(item: &Value, variant: CrawlerVariant, _: Option<&str>) -> CanonicalReview {
    let (name, url) = variant.platform_label();
    let location = match (number_at(item, "/latitude"), number_at(item, "/longitude")) {
        (Some(lat), Some(lng)) => Some(GeoLocation { lat, lng }),
        _ => None,
    };

    CanonicalReview {
        subject: ReviewSubject {
            name: string_at(item, "/name").unwrap_or_default(),
            address: string_at(item, "/address"),
            categories: strings_at(item, "/types"),
            location,
            url: string_at(item, "/webpage"),
            ..Default::default()
        },
        platform: PlatformInfo {
            name: name.to_string(),
            url: url.to_string(),
            subject_url: string_at(item, "/url"),
        },
        author: ReviewAuthor {
            name: string_at(item, "/author"),
        },
        review: ReviewBody {
            title: None,
            text: string_at(item, "/description"),
            date_published: string_at(item, "/datePublished"),
            url: string_at(item, "/rev_url"),
        },
        rating: Rating::new(RATING_MIN, number_at(item, "/ratingValue"), RATING_MAX),
        detailed_review: Vec::new(),
        verifiable: false,
        schema_version: None,
    }
}

fn tripadvisor_review(item: &Value, variant: CrawlerVariant, _: Option<&str>) -> CanonicalReview {
    let (name, url) = variant.platform_label();

    CanonicalReview {
        subject: ReviewSubject {
            name: string_at(item, "/name").unwrap_or_default(),
            address: tripadvisor_address(item),
            telephone: string_at(item, "/telephone"),
            categories: ["/type", "/subtype"]
                .iter()
                .filter_map(|path| string_at(item, path))
                .collect(),
            url: string_at(item, "/url"),
            platform_url: string_at(item, "/restaurant_url"),
            ..Default::default()
        },
        platform: PlatformInfo {
            name: name.to_string(),
            url: url.to_string(),
            subject_url: string_at(item, "/url"),
        },
        author: ReviewAuthor {
            name: string_at(item, "/author"),
        },
        review: ReviewBody {
            title: string_at(item, "/title"),
            text: string_at(item, "/text"),
            date_published: string_at(item, "/date"),
            url: string_at(item, "/rev_url"),
        },
        rating: Rating::new(RATING_MIN, number_at(item, "/score"), RATING_MAX),
        ..Default::default()
    }
}

/// "street, city postal, country" built from whichever parts are present.
fn tripadvisor_address(item: &Value) -> Option<String> {
    let locality = [string_at(item, "/city"), string_at(item, "/postal")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let parts: Vec<String> = [
        string_at(item, "/street"),
        Some(locality).filter(|l| !l.is_empty()),
        string_at(item, "/country"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn upwork_legacy_review(item: &Value, variant: CrawlerVariant, _: Option<&str>) -> CanonicalReview {
    let (name, url) = variant.platform_label();
    let detailed_review = array_at(item, "/feedback/scoreDetails")
        .iter()
        .map(|detail| DetailedRating {
            rating: Rating::new(DETAIL_RATING_MIN, number_at(detail, "/score"), RATING_MAX),
            review_text: string_at(detail, "/description"),
            category: string_at(detail, "/label"),
            attribute: String::new(),
        })
        .collect();

    CanonicalReview {
        subject: ReviewSubject {
            // Freelancer profiles carry no agency name.
            name: string_at(item, "/agencyName").unwrap_or_default(),
            categories: strings_at(item, "/skills"),
            ..Default::default()
        },
        platform: PlatformInfo {
            name: name.to_string(),
            url: url.to_string(),
            subject_url: None,
        },
        author: ReviewAuthor {
            name: string_at(item, "/clientId"),
        },
        review: ReviewBody {
            text: string_at(item, "/feedback/comment"),
            ..Default::default()
        },
        rating: Rating::new(RATING_MIN, number_at(item, "/feedback/score"), RATING_MAX),
        detailed_review,
        ..Default::default()
    }
}

fn actor_canonical_review(
    item: &Value,
    variant: CrawlerVariant,
    profile_url: Option<&str>,
) -> CanonicalReview {
    let (name, url) = variant.platform_label();
    let detailed_review = array_at(item, "/detailed_review")
        .iter()
        .map(|detail| DetailedRating {
            rating: Rating::new(DETAIL_RATING_MIN, number_at(detail, "/rating/value"), RATING_MAX),
            review_text: None,
            category: string_at(detail, "/category"),
            attribute: String::new(),
        })
        .collect();

    CanonicalReview {
        subject: ReviewSubject {
            name: string_at(item, "/subject/name").unwrap_or_default(),
            categories: strings_at(item, "/subject/categories"),
            ..Default::default()
        },
        platform: PlatformInfo {
            name: name.to_string(),
            url: url.to_string(),
            subject_url: string_at(item, "/platform/subject_url")
                .or_else(|| profile_url.map(str::to_string)),
        },
        author: ReviewAuthor {
            name: string_at(item, "/author/name"),
        },
        review: ReviewBody {
            title: Some(string_at(item, "/review/title").unwrap_or_default()),
            text: Some(string_at(item, "/review/text").unwrap_or_default()),
            ..Default::default()
        },
        rating: Rating::new(RATING_MIN, number_at(item, "/rating/value"), RATING_MAX),
        detailed_review,
        ..Default::default()
    }
}

/// String at a JSON pointer. Numbers and booleans are rendered as text.
fn string_at(item: &Value, path: &str) -> Option<String> {
    match item.pointer(path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Number at a JSON pointer, accepting numeric strings.
fn number_at(item: &Value, path: &str) -> Option<f64> {
    match item.pointer(path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn array_at<'a>(item: &'a Value, path: &str) -> &'a [Value] {
    item.pointer(path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn strings_at(item: &Value, path: &str) -> Vec<String> {
    array_at(item, path)
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}
