//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use sitecast_core::{
    LlmClient, Orchestrator, RunRegistry, RunStatus, TriggerOptions, TriggerResponse,
};
use sitecast_crawler::{CrawlLimits, Crawler};
use sitecast_shared::{
    AppConfig, CrawlConfig, DomainId, DomainRecord, LogEntry, LogLevel, PipelineConfig, RetryPolicy,
    default_database_path, init_config, load_config,
};
use sitecast_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sitecast: website in, social media plan out.
#[derive(Parser)]
#[command(
    name = "sitecast",
    version,
    about = "Crawl a website and generate a brand profile, content strategy, and 30-day social calendar.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (defaults to ~/.sitecast/sitecast.db).
    #[arg(long, env = "SITECAST_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Manage registered domains.
    Domain {
        #[command(subcommand)]
        action: DomainAction,
    },

    /// Crawl a domain and replace its stored pages.
    Crawl {
        /// Domain ID.
        domain_id: DomainId,

        /// Maximum pages to collect.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Maximum link depth from the start URL.
        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Run the full marketing pipeline for a domain.
    Run {
        /// Domain ID.
        domain_id: DomainId,

        /// Maximum pages for the crawl step.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Maximum depth for the crawl step.
        #[arg(long)]
        max_depth: Option<u32>,

        /// Skip storing calendar posts as drafts.
        #[arg(long)]
        no_drafts: bool,
    },

    /// Print the pipeline status snapshot as JSON.
    Status {
        /// Domain ID.
        domain_id: DomainId,
    },

    /// Provider settings (active_provider, <provider>_api_key, ...).
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Domain subcommands.
#[derive(Subcommand)]
pub(crate) enum DomainAction {
    /// Register a website.
    Add {
        /// Website URL.
        url: String,

        /// Display name (defaults to the URL host).
        #[arg(long)]
        name: Option<String>,

        /// Primary marketing goal.
        #[arg(long)]
        goal: Option<String>,

        /// Brand voice tone (defaults to professional in prompts).
        #[arg(long)]
        tone: Option<String>,
    },
    /// List registered domains.
    List,
}

/// Settings subcommands.
#[derive(Subcommand)]
pub(crate) enum SettingsAction {
    /// Set a value.
    Set { key: String, value: String },
    /// Print one value.
    Get { key: String },
    /// Print all values (API keys masked).
    List,
    /// Remove a value.
    Unset { key: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitecast=warn",
        1 => "sitecast=info",
        _ => "sitecast=debug",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db;
    match cli.command {
        Command::Domain { action } => match action {
            DomainAction::Add {
                url,
                name,
                goal,
                tone,
            } => cmd_domain_add(db, &url, name, goal, tone).await,
            DomainAction::List => cmd_domain_list(db).await,
        },
        Command::Crawl {
            domain_id,
            max_pages,
            max_depth,
        } => cmd_crawl(db, domain_id, max_pages, max_depth).await,
        Command::Run {
            domain_id,
            max_pages,
            max_depth,
            no_drafts,
        } => {
            let options = TriggerOptions {
                max_pages,
                max_depth,
                generate_drafts: no_drafts.then_some(false),
            };
            cmd_run(db, domain_id, options).await
        }
        Command::Status { domain_id } => cmd_status(db, domain_id).await,
        Command::Settings { action } => cmd_settings(db, action).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

async fn open_storage(db: Option<PathBuf>, config: &AppConfig) -> Result<Arc<Storage>> {
    let path = match db {
        Some(path) => path,
        None => default_database_path(config)?,
    };
    info!(path = %path.display(), "opening database");
    Ok(Arc::new(Storage::open(&path).await?))
}

async fn require_domain(storage: &Storage, id: &DomainId) -> Result<DomainRecord> {
    storage
        .get_domain(id)
        .await?
        .ok_or_else(|| eyre!("no domain with id {id}; see `sitecast domain list`"))
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

// ---------------------------------------------------------------------------
// Domains and crawling
// ---------------------------------------------------------------------------

async fn cmd_domain_add(
    db: Option<PathBuf>,
    url: &str,
    name: Option<String>,
    goal: Option<String>,
    tone: Option<String>,
) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(eyre!("URL must use http or https: {url}"));
    }
    let name = name.unwrap_or_else(|| parsed.host_str().unwrap_or("unknown").to_string());

    let config = load_config()?;
    let storage = open_storage(db, &config).await?;

    let mut domain = DomainRecord::new(parsed.as_str(), name);
    domain.primary_goal = goal;
    domain.brand_voice_tone = tone;
    storage.insert_domain(&domain).await?;

    println!("{}", domain.id);
    Ok(())
}

async fn cmd_domain_list(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(db, &config).await?;

    let domains = storage.list_domains().await?;
    if domains.is_empty() {
        println!("No domains registered. Add one with `sitecast domain add <url>`.");
        return Ok(());
    }

    for domain in domains {
        let pages = storage.count_crawled_pages(&domain.id).await?;
        println!(
            "{}  {:<24} {:>4} pages  {}",
            domain.id, domain.name, pages, domain.url
        );
    }
    Ok(())
}

async fn cmd_crawl(
    db: Option<PathBuf>,
    domain_id: DomainId,
    max_pages: Option<usize>,
    max_depth: Option<u32>,
) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(db, &config).await?;
    let domain = require_domain(&storage, &domain_id).await?;

    let crawl_config = CrawlConfig::from(&config);
    let limits = CrawlLimits {
        max_pages: max_pages.unwrap_or(crawl_config.max_pages),
        max_depth: max_depth.unwrap_or(crawl_config.max_depth),
    };

    let progress = spinner();
    progress.set_message(format!("Crawling {} (up to {} pages)", domain.url, limits.max_pages));
    let outcome = Crawler::new(&crawl_config)?
        .crawl(&domain.id, &domain.url, &limits, &storage)
        .await;
    progress.finish_and_clear();
    let outcome = outcome?;

    for page in &outcome.pages {
        let title = if page.title.is_empty() {
            "(untitled)"
        } else {
            page.title.as_str()
        };
        println!("{:<10} {:<40} {}", page.page_type, truncate(title, 40), page.url);
    }

    let stats = &outcome.stats;
    println!();
    println!("  Pages:      {}", stats.pages_fetched);
    println!("  Disallowed: {}", stats.pages_disallowed);
    println!("  Errors:     {}", stats.errors.len());
    println!("  Max depth:  {}", stats.max_depth_reached);
    println!("  Time:       {:.1}s", stats.duration.as_secs_f64());
    for (url, error) in &stats.errors {
        println!("    {url}: {error}");
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

fn build_orchestrator(storage: Arc<Storage>, config: &AppConfig) -> Orchestrator {
    let llm = LlmClient::new(
        Arc::clone(&storage),
        config.llm.clone(),
        RetryPolicy::from(config),
    );
    Orchestrator::new(
        storage,
        Arc::new(llm),
        Arc::new(RunRegistry::new()),
        PipelineConfig::from(config),
    )
}

async fn cmd_run(db: Option<PathBuf>, domain_id: DomainId, options: TriggerOptions) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(db, &config).await?;
    let orchestrator = build_orchestrator(storage, &config);

    let handle = match orchestrator.trigger(&domain_id, options).await? {
        TriggerResponse::Started { handle, .. } => handle,
        TriggerResponse::AlreadyRunning(run) => {
            println!("{}", serde_json::to_string_pretty(&run)?);
            return Ok(());
        }
    };

    let progress = spinner();
    progress.set_message("Starting pipeline");
    let mut printed: Option<LogEntry> = None;
    let mut cancel_requested = false;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    let final_status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                orchestrator.cancel(&domain_id);
                progress.set_message("Cancelling");
            }
            _ = ticker.tick() => {}
        }

        let status = orchestrator.status(&domain_id).await?;
        for entry in unseen(&status.logs, printed.as_ref()) {
            progress.println(format!("[{}] {}", level_label(entry.level), entry.message));
        }
        if let Some(last) = status.logs.last() {
            printed = Some(last.clone());
        }
        if let Some(step) = status.current_step {
            progress.set_message(format!("Running {step}"));
        }

        let finished = matches!(status.pipeline_status, RunStatus::Done | RunStatus::Error);
        if finished && handle.is_finished() {
            break status;
        }
    };
    progress.finish_and_clear();
    handle.await.map_err(|e| eyre!("pipeline task failed: {e}"))?;

    match final_status.pipeline_status {
        RunStatus::Done => {
            println!();
            println!("  Pipeline complete for {}", final_status.domain_name);
            println!("  Pages:  {}", final_status.steps.crawl.page_count);
            println!("  Drafts: {}", final_status.draft_count);
            println!();
            Ok(())
        }
        _ => Err(eyre!(
            "pipeline failed: {}",
            final_status.error.unwrap_or_else(|| "unknown error".into())
        )),
    }
}

/// Entries after the last one already printed. The registry evicts old
/// entries, so position is found by value rather than by count.
fn unseen<'a>(logs: &'a [LogEntry], last_printed: Option<&LogEntry>) -> &'a [LogEntry] {
    match last_printed.and_then(|last| logs.iter().rposition(|e| e == last)) {
        Some(index) => &logs[index + 1..],
        None => logs,
    }
}

fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Success => " ok ",
        LogLevel::Error => "fail",
    }
}

async fn cmd_status(db: Option<PathBuf>, domain_id: DomainId) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(db, &config).await?;
    let status = build_orchestrator(storage, &config)
        .status(&domain_id)
        .await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings and config
// ---------------------------------------------------------------------------

async fn cmd_settings(db: Option<PathBuf>, action: SettingsAction) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(db, &config).await?;

    match action {
        SettingsAction::Set { key, value } => {
            storage.set_setting(&key, &value).await?;
            println!("{key} = {}", display_value(&key, &value));
        }
        SettingsAction::Get { key } => match storage.get_setting(&key).await? {
            Some(value) => println!("{value}"),
            None => return Err(eyre!("setting '{key}' is not set")),
        },
        SettingsAction::List => {
            for (key, value) in storage.all_settings().await? {
                println!("{key} = {}", display_value(&key, &value));
            }
        }
        SettingsAction::Unset { key } => {
            if !storage.delete_setting(&key).await? {
                return Err(eyre!("setting '{key}' is not set"));
            }
        }
    }
    Ok(())
}

fn display_value(key: &str, value: &str) -> String {
    if !key.ends_with("_api_key") {
        return value.to_string();
    }
    let tail: String = value
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let id = DomainId::new();
        let cli = Cli::try_parse_from([
            "sitecast",
            "run",
            &id.to_string(),
            "--max-pages",
            "5",
            "--no-drafts",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                domain_id,
                max_pages,
                no_drafts,
                ..
            } => {
                assert_eq!(domain_id, id);
                assert_eq!(max_pages, Some(5));
                assert!(no_drafts);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn cli_rejects_malformed_domain_id() {
        assert!(Cli::try_parse_from(["sitecast", "status", "not-a-uuid"]).is_err());
    }

    #[test]
    fn unseen_handles_eviction() {
        let a = LogEntry::now(LogLevel::Info, "a");
        let b = LogEntry::now(LogLevel::Info, "b");
        let c = LogEntry::now(LogLevel::Success, "c");

        let logs = vec![a.clone(), b.clone(), c.clone()];
        assert_eq!(unseen(&logs, None).len(), 3);
        assert_eq!(unseen(&logs, Some(&b)), &[c.clone()]);
        assert!(unseen(&logs, Some(&c)).is_empty());

        // Last printed entry was evicted: print everything still held.
        let evicted = vec![c.clone()];
        assert_eq!(unseen(&evicted, Some(&a)), &[c]);
    }

    #[test]
    fn api_keys_are_masked() {
        assert_eq!(display_value("openai_api_key", "sk-abcdef1234"), "****1234");
        assert_eq!(display_value("openai_model", "gpt-4o-mini"), "gpt-4o-mini");
    }
}
