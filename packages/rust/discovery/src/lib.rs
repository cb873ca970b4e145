//! robots.txt fetching for the sitecast crawler.
//!
//! Before crawling a site, sitecast reads `<origin>/robots.txt` once and
//! collects the `Disallow:` prefixes of the `User-agent: *` group. Any
//! failure along the way fails open: the crawl proceeds without restrictions.

mod parser;

use std::time::Duration;

use reqwest::Client;
use sitecast_shared::{Result, SitecastError};
use tracing::{debug, info, instrument};
use url::Url;

pub use parser::{RobotsRules, parse_robots_txt};

/// Default timeout in seconds for fetching robots.txt.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// User-Agent string for robots requests.
const USER_AGENT: &str = concat!(
    "SitecastCrawler/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/sitecast)"
);

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for the robots fetch.
#[derive(Debug, Clone)]
pub struct RobotsOptions {
    /// Timeout for the HTTP request.
    pub timeout: Duration,
}

impl Default for RobotsOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Fetch and parse `<origin>/robots.txt` for the given URL.
///
/// Never fails: non-2xx responses, network errors, timeouts and unreadable
/// bodies all yield [`RobotsRules::allow_all`].
#[instrument(skip_all, fields(url = %url))]
pub async fn fetch_robots(url: &Url, opts: &RobotsOptions) -> RobotsRules {
    let origin = match origin_url(url) {
        Ok(origin) => origin,
        Err(e) => {
            debug!(error = %e, "cannot derive origin, no robots restrictions");
            return RobotsRules::allow_all();
        }
    };
    let robots_url = format!("{origin}/robots.txt");

    let body = match fetch_text(&robots_url, opts).await {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "robots.txt unavailable, no restrictions");
            return RobotsRules::allow_all();
        }
    };

    let rules = parse_robots_txt(&body);
    info!(disallowed = rules.disallowed.len(), "robots.txt parsed");
    rules
}

/// Convenience wrapper returning only the disallowed prefixes.
pub async fn fetch_disallowed(url: &Url, opts: &RobotsOptions) -> Vec<String> {
    fetch_robots(url, opts).await.disallowed
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the origin (scheme + host + port) from a URL.
pub fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| SitecastError::validation(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

fn build_client(opts: &RobotsOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(opts.timeout)
        .build()
        .map_err(|e| SitecastError::Network(format!("failed to build HTTP client: {e}")))
}

async fn fetch_text(url: &str, opts: &RobotsOptions) -> Result<String> {
    let client = build_client(opts)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SitecastError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SitecastError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| SitecastError::Network(format!("{url}: failed to read body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_origin_url_simple() {
        let url = Url::parse("https://shop.example.com/foo/bar?x=1").unwrap();
        assert_eq!(origin_url(&url).unwrap(), "https://shop.example.com");
    }

    #[test]
    fn test_origin_url_with_port() {
        let url = Url::parse("http://localhost:3000/blog").unwrap();
        assert_eq!(origin_url(&url).unwrap(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn test_fetch_robots_parses_wildcard_group() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /private\nDisallow: /cart\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/deep/page", server.uri())).unwrap();
        let rules = fetch_robots(&url, &RobotsOptions::default()).await;

        assert_eq!(rules.disallowed, vec!["/private", "/cart"]);
        assert!(rules.is_disallowed("/private/x"));
    }

    #[tokio::test]
    async fn test_server_error_fails_open() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(500).set_body_string("User-agent: *\nDisallow: /"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let disallowed = fetch_disallowed(&url, &RobotsOptions::default()).await;
        assert!(disallowed.is_empty());
    }

    #[tokio::test]
    async fn test_missing_robots_fails_open() {
        let server = MockServer::start().await;

        let url = Url::parse(&server.uri()).unwrap();
        let rules = fetch_robots(&url, &RobotsOptions::default()).await;
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fails_open() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let opts = RobotsOptions {
            timeout: Duration::from_millis(50),
        };
        assert!(fetch_robots(&url, &opts).await.is_empty());
    }
}
