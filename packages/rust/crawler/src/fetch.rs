//! Page fetching and HTML extraction.
//!
//! [`PageFetcher`] performs the time-bounded GET; [`extract_page`] turns the
//! returned HTML into title, headings, body text and same-host links.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use scraper::{Html, Selector};
use sitecast_shared::{Heading, Result, SitecastError};
use tracing::debug;
use url::Url;

use crate::normalize::normalize_parsed;

/// User-Agent string for page requests.
pub const USER_AGENT: &str = concat!(
    "SitecastCrawler/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/sitecast)"
);

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml";

// ---------------------------------------------------------------------------
// Selectors (compiled once)
// ---------------------------------------------------------------------------

/// Boilerplate subtrees removed before any text is extracted.
static STRIP_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script, style, nav, footer, header, noscript, iframe").expect("strip selector")
});

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));

static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4").expect("heading selector"));

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("link selector"));

/// Main-content candidates in priority order; `body` is the fallback.
static CONTENT_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["main", "article", ".content", "#content", "body"]
        .iter()
        .map(|s| Selector::parse(s).expect("content selector"))
        .collect()
});

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Raw HTML returned by a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedHtml {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    pub body: String,
}

/// HTTP client for crawl requests with a fixed identity and timeout.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    /// Build a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| SitecastError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// GET `url`, accepting only 2xx `text/html` responses.
    pub async fn fetch(&self, url: &str) -> Result<FetchedHtml> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SitecastError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SitecastError::Network(format!("{url}: HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("text/html") {
            return Err(SitecastError::validation(format!(
                "{url}: content-type {content_type:?} is not HTML"
            )));
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| SitecastError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(FetchedHtml {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Structured content extracted from one HTML page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub title: String,
    pub headings: Vec<Heading>,
    pub body_text: String,
    /// Same-host, normalized, deduplicated links in first-seen order.
    pub internal_links: Vec<String>,
}

/// Extract title, headings, body text and internal links from `html`.
///
/// Links are resolved against `page_url` and kept only when their host
/// equals `site_host`. Body text is capped at `body_limit` characters.
pub fn extract_page(html: &str, page_url: &Url, site_host: &str, body_limit: usize) -> ExtractedPage {
    let mut doc = Html::parse_document(html);
    strip_boilerplate(&mut doc);

    let title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let headings = doc
        .select(&HEADING_SEL)
        .filter_map(|el| {
            let text = el.text().collect::<String>().trim().to_string();
            (!text.is_empty()).then(|| Heading {
                tag: el.value().name().to_lowercase(),
                text,
            })
        })
        .collect();

    let body_text = CONTENT_SELS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .map(|text| truncate_chars(&text, body_limit))
        .unwrap_or_default();

    let internal_links = extract_internal_links(&doc, page_url, site_host);

    ExtractedPage {
        title,
        headings,
        body_text,
        internal_links,
    }
}

/// Detach every boilerplate subtree from the document.
fn strip_boilerplate(doc: &mut Html) {
    let ids: Vec<_> = doc.select(&STRIP_SEL).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn extract_internal_links(doc: &Html, page_url: &Url, site_host: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = page_url.join(href) else {
            continue;
        };
        if resolved.host_str() != Some(site_host) {
            continue;
        }

        let normalized = normalize_parsed(resolved);
        if seen.insert(normalized.clone()) {
            links.push(normalized);
        }
    }

    links
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `limit` characters (not bytes).
fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
