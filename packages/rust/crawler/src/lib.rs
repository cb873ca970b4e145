//! Breadth-first site crawler and page extraction.
//!
//! This crate provides:
//! - [`normalize`]: URL canonicalization for dedup
//! - [`fetch`]: time-bounded HTML fetching and content extraction
//! - [`classify`]: heuristic page typing
//! - [`engine`]: bounded BFS crawl persisted through the storage layer

pub mod classify;
pub mod engine;
pub mod fetch;
pub mod normalize;

pub use classify::classify;
pub use engine::{CrawlLimits, CrawlOutcome, CrawlStats, Crawler, crawl_domain};
pub use fetch::{ExtractedPage, FetchedHtml, PageFetcher, extract_page};
pub use normalize::normalize_url;
