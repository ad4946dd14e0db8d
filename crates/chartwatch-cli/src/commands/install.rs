//! `chartwatch install`: install the configured releases in order

use clap::Args;
use tracing::info;

use chartwatch_lifecycle::{ChartRelease, WorkloadReadiness};
use chartwatch_session::Session;

use super::{finish_session, Harness};
use crate::{Error, GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Install only these releases (and keep their order from the config)
    #[arg(short = 'r', long = "release")]
    pub releases: Vec<String>,

    /// Remove everything again after a successful install
    #[arg(long)]
    pub cleanup: bool,

    /// Also wait for Deployments and DaemonSets in each release namespace
    #[arg(long)]
    pub wait_workloads: bool,
}

/// Releases from `all` named in `wanted`, in config order; all of them when
/// `wanted` is empty
pub fn select_releases(all: &[ChartRelease], wanted: &[String]) -> Result<Vec<ChartRelease>> {
    if wanted.is_empty() {
        return Ok(all.to_vec());
    }
    if let Some(unknown) = wanted.iter().find(|w| !all.iter().any(|r| &r.name == *w)) {
        return Err(Error::validation(format!("no release named {unknown} in config")));
    }
    Ok(all
        .iter()
        .filter(|r| wanted.contains(&r.name))
        .cloned()
        .collect())
}

pub async fn run(global: &GlobalArgs, args: InstallArgs) -> Result<()> {
    let harness = Harness::connect(&global.config, global.kubeconfig.clone()).await?;
    let releases = select_releases(&harness.config.releases, &args.releases)?;
    if releases.is_empty() {
        return Err(Error::validation("no releases to install"));
    }

    let session = Session::named("install");
    let outcome = install_and_verify(&harness, &session, &releases, args.wait_workloads).await;

    // Roll back on failure; keep the releases on success unless asked not to
    if outcome.is_err() || args.cleanup {
        return finish_session(&session, outcome).await;
    }
    info!(releases = releases.len(), "Install complete, leaving releases in place");
    outcome
}

async fn install_and_verify(
    harness: &Harness,
    session: &Session,
    releases: &[ChartRelease],
    wait_workloads: bool,
) -> Result<()> {
    let outcomes = harness.orchestrator.install_all(session, releases).await?;
    for (release, outcome) in releases.iter().zip(&outcomes) {
        println!(
            "{}\tReady\t{} events\t{:.1}s",
            release.resource(),
            outcome.events_consumed,
            outcome.elapsed.as_secs_f64()
        );
    }

    if wait_workloads {
        let readiness = WorkloadReadiness::new(harness.aggregate_reader(), harness.config.poller());
        let mut namespaces: Vec<&str> = releases.iter().map(|r| r.namespace.as_str()).collect();
        namespaces.sort_unstable();
        namespaces.dedup();
        for namespace in namespaces {
            let polled = readiness.wait_ready(namespace).await?;
            if !polled.ready {
                let pending: Vec<String> = polled
                    .value
                    .iter()
                    .filter(|w| !w.is_ready())
                    .map(|w| format!("{} {} ({}/{})", w.kind, w.name, w.available, w.desired))
                    .collect();
                return Err(Error::command_failed(format!(
                    "workloads in {namespace} not available after {} attempts: {}",
                    polled.attempts,
                    if pending.is_empty() {
                        "none found".to_string()
                    } else {
                        pending.join(", ")
                    }
                )));
            }
            info!(namespace = %namespace, workloads = polled.value.len(), "Workloads available");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(name: &str) -> ChartRelease {
        ChartRelease::new(name, "ns", name, "1.0.0", "charts")
    }

    #[test]
    fn test_select_keeps_config_order() {
        let all = vec![release("a"), release("b"), release("c")];
        let picked = select_releases(&all, &["c".to_string(), "a".to_string()]).unwrap();
        let names: Vec<_> = picked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);

        assert_eq!(select_releases(&all, &[]).unwrap().len(), 3);
        assert!(select_releases(&all, &["zzz".to_string()]).is_err());
    }
}
