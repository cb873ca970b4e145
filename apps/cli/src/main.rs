//! sitecast CLI: crawl a website and turn it into a social media plan.
//!
//! Registers domains, crawls them, and drives the LLM marketing pipeline
//! (brand profile, competitors, strategy, 30-day calendar, post drafts).

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
