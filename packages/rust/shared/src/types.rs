//! Core domain types for sitecast: domains, crawled pages, run logs, drafts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DomainId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for domain identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub Uuid);

impl DomainId {
    /// Generate a new time-sortable domain identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DomainId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// DomainRecord
// ---------------------------------------------------------------------------

/// A website registered for crawling and campaign planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    pub id: DomainId,
    /// Start URL of the site.
    pub url: String,
    /// Display name; defaults to the host when not given.
    pub name: String,
    /// Marketing goal fed into the analysis prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_goal: Option<String>,
    /// Preferred brand voice fed into the analysis prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_voice_tone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DomainRecord {
    /// Build a new record with fresh id and timestamps.
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DomainId::new(),
            url: url.into(),
            name: name.into(),
            primary_goal: None,
            brand_voice_tone: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// CrawledPage
// ---------------------------------------------------------------------------

/// An `h1`–`h4` heading extracted from a page, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// Lowercase tag name (`h1` … `h4`).
    pub tag: String,
    pub text: String,
}

/// Heuristic page category.
///
/// Serde goes through [`PageType::as_str`] / [`PageType::from_name`], so
/// storage, prompts and JSON share the single name table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", from = "String")]
pub enum PageType {
    Home,
    Blog,
    Category,
    Pricing,
    About,
    Signup,
    Contact,
    Product,
    Other,
}

const PAGE_TYPE_NAMES: [(PageType, &str); 9] = [
    (PageType::Home, "home"),
    (PageType::Blog, "blog"),
    (PageType::Category, "category"),
    (PageType::Pricing, "pricing"),
    (PageType::About, "about"),
    (PageType::Signup, "signup"),
    (PageType::Contact, "contact"),
    (PageType::Product, "product"),
    (PageType::Other, "other"),
];

impl PageType {
    /// Stable lowercase name used in storage and prompts.
    pub fn as_str(&self) -> &'static str {
        PAGE_TYPE_NAMES
            .iter()
            .find(|(kind, _)| kind == self)
            .map_or("other", |(_, name)| *name)
    }

    /// Inverse of [`PageType::as_str`]; unknown names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        PAGE_TYPE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map_or(Self::Other, |(kind, _)| *kind)
    }
}

impl From<PageType> for &'static str {
    fn from(kind: PageType) -> Self {
        kind.as_str()
    }
}

impl From<String> for PageType {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl std::fmt::Display for PageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully fetched, allowed HTML page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPage {
    /// Unique page identifier (UUID v7).
    pub id: String,
    /// Normalized page URL.
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub headings: Vec<Heading>,
    /// Whitespace-collapsed main text, capped in characters.
    #[serde(default)]
    pub body_text: String,
    /// Same-host normalized links, first-seen order, no duplicates.
    #[serde(default)]
    pub internal_links: Vec<String>,
    pub page_type: PageType,
    /// SHA-256 hash of `body_text`.
    pub content_hash: String,
    pub crawled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Run log
// ---------------------------------------------------------------------------

/// Severity of a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

/// One entry in a pipeline run's user-visible log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Singleton per-domain outputs of the pipeline's LLM steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    DomainProfile,
    CompetitorSet,
    PositioningSummary,
    ContentStrategy,
    CampaignCalendar,
}

impl ArtifactKind {
    /// Fixed storage key for this artifact.
    pub fn key(&self) -> &'static str {
        match self {
            Self::DomainProfile => "domain_profile",
            Self::CompetitorSet => "competitor_set",
            Self::PositioningSummary => "positioning_summary",
            Self::ContentStrategy => "content_strategy",
            Self::CampaignCalendar => "campaign_calendar",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// PostDraft
// ---------------------------------------------------------------------------

/// A social post drafted from a campaign calendar entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDraft {
    pub id: String,
    pub domain_id: DomainId,
    /// Target platform (`twitter`, `linkedin`, …).
    pub platform: String,
    pub text: String,
    /// Calendar date as given by the model (free-form, usually `YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<String>,
    /// Lifecycle status; drafts start as `draft`.
    pub status: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_id_roundtrip() {
        let id = DomainId::new();
        let parsed: DomainId = id.to_string().parse().expect("parse DomainId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn page_type_serializes_lowercase() {
        let json = serde_json::to_string(&PageType::Pricing).expect("serialize");
        assert_eq!(json, "\"pricing\"");
        assert_eq!(PageType::from_name("signup"), PageType::Signup);
        assert_eq!(PageType::from_name("unknown"), PageType::Other);
    }

    #[test]
    fn page_type_names_match_serde_for_every_variant() {
        for (kind, name) in PAGE_TYPE_NAMES {
            assert_eq!(kind.as_str(), name);
            assert_eq!(serde_json::to_value(kind).expect("serialize"), name);
            let parsed: PageType = serde_json::from_value(name.into()).expect("deserialize");
            assert_eq!(parsed, kind);
            assert_eq!(PageType::from_name(name), kind);
        }
        let unknown: PageType = serde_json::from_str("\"landing\"").expect("deserialize");
        assert_eq!(unknown, PageType::Other);
    }

    #[test]
    fn artifact_keys_are_stable() {
        assert_eq!(ArtifactKind::DomainProfile.key(), "domain_profile");
        assert_eq!(ArtifactKind::CampaignCalendar.to_string(), "campaign_calendar");
        let json = serde_json::to_string(&ArtifactKind::CompetitorSet).expect("serialize");
        assert_eq!(json, "\"competitor_set\"");
        let json = serde_json::to_string(&ArtifactKind::PositioningSummary).expect("serialize");
        assert_eq!(json, format!("\"{}\"", ArtifactKind::PositioningSummary.key()));
    }

    #[test]
    fn log_entry_serialization() {
        let entry = LogEntry::now(LogLevel::Success, "Crawl complete");
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["level"], "success");
        assert_eq!(json["message"], "Crawl complete");
    }

    #[test]
    fn crawled_page_defaults_missing_collections() {
        let json = r#"{
            "id": "p1",
            "url": "https://example.com/",
            "page_type": "home",
            "content_hash": "abc",
            "crawled_at": "2025-01-01T00:00:00Z"
        }"#;
        let page: CrawledPage = serde_json::from_str(json).expect("deserialize");
        assert!(page.headings.is_empty());
        assert!(page.internal_links.is_empty());
        assert_eq!(page.page_type, PageType::Home);
    }
}
