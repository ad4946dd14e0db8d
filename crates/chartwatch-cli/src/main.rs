//! chartwatch
//!
//! Installs, upgrades, and removes chart releases on a cluster, confirming
//! every step from the release's own watch events.

use clap::Parser;

use chartwatch_cli::{Cli, Result};
use chartwatch_common::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(cli.telemetry())?;
    cli.run().await
}
