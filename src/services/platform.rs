//! Supported review platforms and the provider actor that crawls each one.

use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::error::CrawlError;
use crate::models::request::Credentials;

/// Third-party review sources reviews can be imported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Platform {
    Yelp,
    Upwork,
    Fiverr,
    Linkedin,
    Tripadvisor,
}

/// Key jobs are stored under for a requested platform name.
///
/// Supported names collapse to their canonical spelling so that "Yelp" and
/// "yelp" share one pending-job slot.
pub fn job_key(name: &str) -> String {
    let name = name.trim();
    name.parse::<Platform>()
        .map(|p| p.to_string())
        .unwrap_or_else(|_| name.to_string())
}

/// One provider actor, i.e. one concrete crawl adapter.
///
/// Upwork has two: the legacy actor scrapes public profiles without a login,
/// the newer one logs in and emits canonical-shaped records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum CrawlerVariant {
    Yelp,
    UpworkLegacy,
    Upwork,
    Fiverr,
    Linkedin,
    Tripadvisor,
}

/// Record layout a variant's actor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Yelp,
    Tripadvisor,
    UpworkLegacy,
    /// Actor output already follows the canonical review layout.
    ActorCanonical,
}

impl CrawlerVariant {
    /// Pick the adapter for a platform given what the caller supplied.
    pub fn route(platform: Platform, credentials: &Credentials) -> Self {
        match platform {
            Platform::Yelp => CrawlerVariant::Yelp,
            Platform::Upwork if credentials.is_supplied() => CrawlerVariant::Upwork,
            Platform::Upwork => CrawlerVariant::UpworkLegacy,
            Platform::Fiverr => CrawlerVariant::Fiverr,
            Platform::Linkedin => CrawlerVariant::Linkedin,
            Platform::Tripadvisor => CrawlerVariant::Tripadvisor,
        }
    }

    /// Route a raw platform name, failing for anything outside the supported set.
    pub fn route_name(platform: &str, credentials: &Credentials) -> Result<Self, CrawlError> {
        let platform: Platform = platform
            .trim()
            .parse()
            .map_err(|_| CrawlError::UnsupportedPlatform(platform.to_string()))?;
        Ok(Self::route(platform, credentials))
    }

    /// Recover the variant of an in-flight run from its persisted actor id.
    pub fn from_actor_id(actor_id: &str) -> Option<Self> {
        Self::iter().find(|v| v.actor_id() == actor_id)
    }

    pub fn platform(self) -> Platform {
        match self {
            CrawlerVariant::Yelp => Platform::Yelp,
            CrawlerVariant::UpworkLegacy | CrawlerVariant::Upwork => Platform::Upwork,
            CrawlerVariant::Fiverr => Platform::Fiverr,
            CrawlerVariant::Linkedin => Platform::Linkedin,
            CrawlerVariant::Tripadvisor => Platform::Tripadvisor,
        }
    }

    pub fn actor_id(self) -> &'static str {
        match self {
            CrawlerVariant::Yelp => "4zxEDkuRom4fEJNkL",
            CrawlerVariant::UpworkLegacy => "PWaorZyrfNgetFoHp",
            CrawlerVariant::Upwork => "XPS87bEfWSpvb8Kpo",
            CrawlerVariant::Fiverr => "sPWyRGiZt3uQbQc8h",
            CrawlerVariant::Linkedin => "gYBQuWnfgsBc3hMHY",
            CrawlerVariant::Tripadvisor => "KJ23ZhcXaTruoaDQ4",
        }
    }

    pub fn record_format(self) -> RecordFormat {
        match self {
            CrawlerVariant::Yelp => RecordFormat::Yelp,
            CrawlerVariant::Tripadvisor => RecordFormat::Tripadvisor,
            CrawlerVariant::UpworkLegacy => RecordFormat::UpworkLegacy,
            CrawlerVariant::Upwork | CrawlerVariant::Fiverr | CrawlerVariant::Linkedin => {
                RecordFormat::ActorCanonical
            }
        }
    }

    /// Display name and host written into `platform` of normalized reviews.
    pub fn platform_label(self) -> (&'static str, &'static str) {
        match self.platform() {
            Platform::Yelp => ("yelp", "yelp.com"),
            Platform::Upwork => ("Upwork", "upwork.com"),
            Platform::Fiverr => ("Fiverr", "fiverr.com"),
            Platform::Linkedin => ("LinkedIn", "linkedin.com"),
            Platform::Tripadvisor => ("TripAdvisor", "tripadvisor.com"),
        }
    }

    /// Whether the actor can run without a target URL.
    pub fn requires_url(self) -> bool {
        !matches!(self, CrawlerVariant::Linkedin)
    }
}
