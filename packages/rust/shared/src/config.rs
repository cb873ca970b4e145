//! Application configuration for sitecast.
//!
//! User config lives at `~/.sitecast/sitecast.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SitecastError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitecast.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitecast";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "sitecast.db";

// ---------------------------------------------------------------------------
// Config structs (matching sitecast.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Crawler limits and timeouts.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// LLM provider fallbacks and retry policy.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Pipeline orchestration settings.
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the libSQL database. Empty means `~/.sitecast/sitecast.db`.
    #[serde(default)]
    pub database_path: String,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Maximum number of pages collected per crawl.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum BFS depth from the start URL.
    #[serde(default = "default_crawl_depth")]
    pub max_depth: u32,

    /// Per-page fetch timeout in seconds.
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,

    /// robots.txt fetch timeout in seconds.
    #[serde(default = "default_robots_timeout")]
    pub robots_timeout_secs: u64,

    /// Maximum characters of body text kept per page.
    #[serde(default = "default_body_text_limit")]
    pub body_text_limit: usize,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_crawl_depth(),
            page_timeout_secs: default_page_timeout(),
            robots_timeout_secs: default_robots_timeout(),
            body_text_limit: default_body_text_limit(),
        }
    }
}

fn default_max_pages() -> usize {
    20
}
fn default_crawl_depth() -> u32 {
    3
}
fn default_page_timeout() -> u64 {
    10
}
fn default_robots_timeout() -> u64 {
    5
}
fn default_body_text_limit() -> usize {
    5000
}

/// `[llm]` section: fallbacks used when the settings store has no value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider used when no `active_provider` setting exists.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// OpenAI-compatible base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Total attempts per completion when the provider rate-limits.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit in seconds; attempt `n` waits `n * unit`.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_attempts: default_max_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_max_attempts() -> u32 {
    4
}
fn default_retry_base_delay() -> u64 {
    8
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Quiescence delay between LLM steps, in seconds.
    #[serde(default = "default_step_delay")]
    pub step_delay_secs: u64,

    /// Page limit for the pipeline's crawl step.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Depth limit for the pipeline's crawl step.
    #[serde(default = "default_pipeline_depth")]
    pub max_depth: u32,

    /// Whether calendar entries are turned into stored post drafts.
    #[serde(default = "default_true")]
    pub generate_drafts: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            step_delay_secs: default_step_delay(),
            max_pages: default_max_pages(),
            max_depth: default_pipeline_depth(),
            generate_drafts: true,
        }
    }
}

fn default_step_delay() -> u64 {
    3
}
fn default_pipeline_depth() -> u32 {
    2
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum pages collected per run.
    pub max_pages: usize,
    /// Maximum BFS depth.
    pub max_depth: u32,
    /// Per-page fetch timeout.
    pub page_timeout: Duration,
    /// robots.txt fetch timeout.
    pub robots_timeout: Duration,
    /// Body text cap in characters.
    pub body_text_limit: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_pages: config.crawl.max_pages,
            max_depth: config.crawl.max_depth,
            page_timeout: Duration::from_secs(config.crawl.page_timeout_secs),
            robots_timeout: Duration::from_secs(config.crawl.robots_timeout_secs),
            body_text_limit: config.crawl.body_text_limit,
        }
    }
}

/// Retry policy for rate-limited provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Attempt `n` (1-based) is followed by a wait of `n * base_delay`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.llm.max_attempts.max(1),
            base_delay: Duration::from_secs(config.llm.retry_base_delay_secs),
        }
    }
}

/// Runtime pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Delay between LLM steps.
    pub step_delay: Duration,
    /// Default page limit for the crawl step.
    pub max_pages: usize,
    /// Default depth limit for the crawl step.
    pub max_depth: u32,
    /// Default for post-draft generation.
    pub generate_drafts: bool,
    /// Crawler timeouts and caps.
    pub crawl: CrawlConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            step_delay: Duration::from_secs(config.pipeline.step_delay_secs),
            max_pages: config.pipeline.max_pages,
            max_depth: config.pipeline.max_depth,
            generate_drafts: config.pipeline.generate_drafts,
            crawl: CrawlConfig::from(config),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitecast/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SitecastError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitecast/sitecast.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the database path: the configured one, or `~/.sitecast/sitecast.db`.
pub fn default_database_path(config: &AppConfig) -> Result<PathBuf> {
    if config.defaults.database_path.is_empty() {
        Ok(config_dir()?.join(DATABASE_FILE_NAME))
    } else {
        Ok(PathBuf::from(&config.defaults.database_path))
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SitecastError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SitecastError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SitecastError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| SitecastError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SitecastError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(toml_str.contains("max_pages"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("step_delay_secs"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[crawl]
max_pages = 5

[llm]
provider = "ollama"
base_url = "http://localhost:11434/v1"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.crawl.max_pages, 5);
        assert_eq!(config.crawl.max_depth, 3);
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.pipeline.max_depth, 2);
        assert!(config.pipeline.generate_drafts);
    }

    #[test]
    fn crawl_config_from_app_config() {
        let crawl = CrawlConfig::from(&AppConfig::default());
        assert_eq!(crawl.max_pages, 20);
        assert_eq!(crawl.max_depth, 3);
        assert_eq!(crawl.page_timeout, Duration::from_secs(10));
        assert_eq!(crawl.robots_timeout, Duration::from_secs(5));
        assert_eq!(crawl.body_text_limit, 5000);
    }

    #[test]
    fn retry_policy_backs_off_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_after(1), Duration::from_secs(8));
        assert_eq!(policy.delay_after(2), Duration::from_secs(16));
        assert_eq!(policy.delay_after(3), Duration::from_secs(24));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let mut app = AppConfig::default();
        app.llm.max_attempts = 0;
        assert_eq!(RetryPolicy::from(&app).max_attempts, 1);
    }

    #[test]
    fn explicit_database_path_wins() {
        let mut app = AppConfig::default();
        app.defaults.database_path = "/tmp/sitecast-test.db".into();
        assert_eq!(
            default_database_path(&app).unwrap(),
            PathBuf::from("/tmp/sitecast-test.db")
        );
    }
}
