//! Bounded breadth-first crawler.
//!
//! The crawler starts from a URL, walks same-host links in strict FIFO order
//! within the page and depth limits, honours the site's robots.txt disallow
//! prefixes, and replaces the domain's stored pages with the result.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use sitecast_discovery::{RobotsOptions, fetch_robots};
use sitecast_shared::{CrawlConfig, CrawledPage, DomainId, Result, SitecastError};
use sitecast_storage::Storage;

use crate::classify::classify;
use crate::fetch::{PageFetcher, extract_page};
use crate::normalize::normalize_url;

// ---------------------------------------------------------------------------
// Limits and results
// ---------------------------------------------------------------------------

/// Per-run traversal bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlLimits {
    /// Maximum number of pages collected.
    pub max_pages: usize,
    /// Maximum BFS depth; the start URL is depth 0.
    pub max_depth: u32,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_pages: 20,
            max_depth: 3,
        }
    }
}

impl From<&CrawlConfig> for CrawlLimits {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_depth: config.max_depth,
        }
    }
}

/// Summary of a completed crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlStats {
    /// Number of pages successfully fetched and kept.
    pub pages_fetched: usize,
    /// Queue entries dropped as already visited or too deep.
    pub pages_skipped: usize,
    /// Queue entries dropped by robots.txt.
    pub pages_disallowed: usize,
    /// Page-level failures (URL, error message).
    pub errors: Vec<(String, String)>,
    /// Deepest BFS level among kept pages.
    pub max_depth_reached: u32,
    pub duration: Duration,
}

/// Pages collected by one crawl run plus its stats.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub pages: Vec<CrawledPage>,
    pub stats: CrawlStats,
}

/// One pending frontier item.
#[derive(Debug, Clone)]
struct FrontierEntry {
    url: String,
    depth: u32,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Sequential BFS crawler over a single host.
pub struct Crawler {
    fetcher: PageFetcher,
    robots: RobotsOptions,
    body_text_limit: usize,
}

impl Crawler {
    /// Create a crawler using the timeouts and body cap from `config`.
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        Ok(Self {
            fetcher: PageFetcher::new(config.page_timeout)?,
            robots: RobotsOptions {
                timeout: config.robots_timeout,
            },
            body_text_limit: config.body_text_limit,
        })
    }

    /// Crawl `start_url` and replace the stored pages for `domain_id`.
    #[instrument(skip_all, fields(domain_id = %domain_id, start_url = %start_url))]
    pub async fn crawl(
        &self,
        domain_id: &DomainId,
        start_url: &str,
        limits: &CrawlLimits,
        storage: &Storage,
    ) -> Result<CrawlOutcome> {
        let outcome = self.collect(start_url, limits).await?;
        storage.replace_crawled_pages(domain_id, &outcome.pages).await?;
        Ok(outcome)
    }

    /// Crawl `start_url` without persisting anything.
    ///
    /// Page-level failures are logged and skipped; only an unusable start
    /// URL fails the whole crawl.
    pub async fn collect(&self, start_url: &str, limits: &CrawlLimits) -> Result<CrawlOutcome> {
        let started = Instant::now();
        let base = Url::parse(start_url)
            .map_err(|e| SitecastError::validation(format!("invalid start URL {start_url}: {e}")))?;
        let site_host = base
            .host_str()
            .ok_or_else(|| SitecastError::validation(format!("start URL has no host: {start_url}")))?
            .to_string();

        let robots = fetch_robots(&base, &self.robots).await;

        let start = normalize_url(start_url);
        let mut queue = VecDeque::from([FrontierEntry {
            url: start.clone(),
            depth: 0,
        }]);
        let mut enqueued: HashSet<String> = HashSet::from([start]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut pages: Vec<CrawledPage> = Vec::new();
        let mut stats = CrawlStats::default();

        info!(
            max_pages = limits.max_pages,
            max_depth = limits.max_depth,
            disallowed = robots.disallowed.len(),
            "starting crawl"
        );

        while pages.len() < limits.max_pages {
            let Some(FrontierEntry { url, depth }) = queue.pop_front() else {
                break;
            };

            if visited.contains(&url) || depth > limits.max_depth {
                stats.pages_skipped += 1;
                continue;
            }
            visited.insert(url.clone());

            let Ok(page_url) = Url::parse(&url) else {
                stats.errors.push((url, "unparseable URL".into()));
                continue;
            };
            if robots.is_disallowed(page_url.path()) {
                debug!(%url, "disallowed by robots.txt");
                stats.pages_disallowed += 1;
                continue;
            }

            debug!(%url, depth, "fetching");
            let fetched = match self.fetcher.fetch(&url).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(%url, error = %e, "page skipped");
                    stats.errors.push((url, e.to_string()));
                    continue;
                }
            };

            // Relative links resolve against where the server actually served the page.
            let extracted =
                extract_page(&fetched.body, &fetched.url, &site_host, self.body_text_limit);

            if depth < limits.max_depth {
                for link in &extracted.internal_links {
                    if !visited.contains(link) && enqueued.insert(link.clone()) {
                        queue.push_back(FrontierEntry {
                            url: link.clone(),
                            depth: depth + 1,
                        });
                    }
                }
            }

            let page_type = classify(page_url.path(), &extracted.title);
            pages.push(CrawledPage {
                id: Uuid::now_v7().to_string(),
                content_hash: compute_hash(&extracted.body_text),
                url,
                title: extracted.title,
                headings: extracted.headings,
                body_text: extracted.body_text,
                internal_links: extracted.internal_links,
                page_type,
                crawled_at: Utc::now(),
            });
            stats.max_depth_reached = stats.max_depth_reached.max(depth);
        }

        stats.pages_fetched = pages.len();
        stats.duration = started.elapsed();

        info!(
            pages_fetched = stats.pages_fetched,
            pages_skipped = stats.pages_skipped,
            pages_disallowed = stats.pages_disallowed,
            errors = stats.errors.len(),
            duration_ms = stats.duration.as_millis(),
            "crawl completed"
        );

        Ok(CrawlOutcome { pages, stats })
    }
}

/// Crawl with default timeouts, replacing the stored pages for `domain_id`.
pub async fn crawl_domain(
    storage: &Storage,
    domain_id: &DomainId,
    start_url: &str,
    limits: CrawlLimits,
) -> Result<Vec<CrawledPage>> {
    let crawler = Crawler::new(&CrawlConfig::default())?;
    let outcome = crawler.crawl(domain_id, start_url, &limits, storage).await?;
    Ok(outcome.pages)
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
