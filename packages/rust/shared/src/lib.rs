//! Shared types, error model, and configuration for sitecast.
//!
//! This crate is the foundation depended on by all other sitecast crates.
//! It provides:
//! - [`SitecastError`]: the unified error type
//! - Domain types ([`DomainRecord`], [`CrawledPage`], [`LogEntry`], [`PostDraft`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlSection, DefaultsConfig, LlmConfig, PipelineConfig,
    PipelineSection, RetryPolicy, config_dir, config_file_path, default_database_path,
    init_config, load_config, load_config_from,
};
pub use error::{Result, SitecastError};
pub use types::{
    ArtifactKind, CrawledPage, DomainId, DomainRecord, Heading, LogEntry, LogLevel, PageType,
    PostDraft,
};
