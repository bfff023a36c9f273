//! TaxDesk CLI: question routing and fiscal portal watching.
//!
//! Triage and plan questions, retrieve context from the local document
//! catalog, and scan portals for new documents to classify.

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
