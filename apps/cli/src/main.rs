//! FloraCrawl CLI — resumable botanical taxonomy crawler.
//!
//! Crawls hierarchical taxonomy sites (order → family → genus → species)
//! into an append-only JSONL record stream with a completion ledger for
//! crash-safe resume.

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
