//! Trendlyze CLI: collect news articles and reduce them to topic-labeled clusters.
//!
//! Runs the staged pipeline (collect, merge, dedup, analyze, semantic,
//! clustered, final) and inspects the snapshots it leaves behind.

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
