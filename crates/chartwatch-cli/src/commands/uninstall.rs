//! `chartwatch uninstall`: remove every configured release

use clap::Args;
use tracing::info;

use chartwatch_session::Session;

use super::{finish_session, Harness};
use crate::{GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Keep namespaces the releases created
    #[arg(long)]
    pub keep_namespaces: bool,
}

pub async fn run(global: &GlobalArgs, args: UninstallArgs) -> Result<()> {
    let harness = Harness::connect(&global.config, global.kubeconfig.clone()).await?;
    let mut releases = harness.config.releases.clone();
    if args.keep_namespaces {
        for release in &mut releases {
            release.create_namespace = false;
        }
    }

    // Adopting in install order registers teardown in install order, so the
    // drain removes dependents first and namespaces last
    let session = Session::named("uninstall");
    for release in &releases {
        harness.orchestrator.adopt(&session, release)?;
    }
    info!(releases = releases.len(), "Uninstalling configured releases");
    finish_session(&session, Ok(())).await
}
