//! `chartwatch upgrade`: move one configured release to a new chart version

use clap::Args;
use tracing::info;

use chartwatch_session::Session;

use super::{finish_session, Harness};
use crate::{GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Release name from the config file
    pub release: String,

    /// Chart version to move to (defaults to the version in the config)
    #[arg(long = "chart-version")]
    pub version: Option<String>,

    /// Uninstall every configured release after the upgrade
    #[arg(long)]
    pub cleanup: bool,
}

pub async fn run(global: &GlobalArgs, args: UpgradeArgs) -> Result<()> {
    let harness = Harness::connect(&global.config, global.kubeconfig.clone()).await?;
    let mut release = harness.config.release(&args.release)?.clone();
    if let Some(version) = args.version {
        release = release.with_version(version);
    }

    // The releases were installed by an earlier run; take them over so
    // --cleanup can remove them in dependency order
    let session = Session::named("upgrade");
    for configured in &harness.config.releases {
        harness.orchestrator.adopt(&session, configured)?;
    }

    let outcome: Result<_> = harness
        .orchestrator
        .upgrade(&release)
        .await
        .map_err(Into::into);
    if let Ok(waited) = &outcome {
        println!(
            "{}\tReady\t{}\t{:.1}s",
            release.resource(),
            release.version,
            waited.elapsed.as_secs_f64()
        );
    }

    if args.cleanup {
        return finish_session(&session, outcome.map(|_| ())).await;
    }
    // Leaving the releases in place: nothing to tear down
    session.release();
    info!(release = %release.name, version = %release.version, "Upgrade finished");
    outcome.map(|_| ())
}
