//! BreachWatch CLI: daily breach-intelligence check for emails and addresses.
//!
//! Looks identifiers up against the breach source, records findings in the
//! relational log and the search index, and flags matching inventory records.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli)?;
    commands::run(cli).await
}
