//! CLI commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kube::Client;
use tracing::{info, warn};

use chartwatch_common::kube_utils::create_client;
use chartwatch_events::KubeEventSource;
use chartwatch_lifecycle::{
    KubeAggregateReader, KubeChartClient, LifecycleOrchestrator, PolicyEnforcer,
};
use chartwatch_session::Session;

use crate::config::HarnessConfig;
use crate::Result;

pub mod audit;
pub mod enforce;
pub mod install;
pub mod providers;
pub mod uninstall;
pub mod upgrade;

/// Connected clients shared by every command
pub struct Harness {
    pub config: HarnessConfig,
    pub client: Client,
    pub orchestrator: LifecycleOrchestrator,
    pub enforcer: PolicyEnforcer,
}

impl Harness {
    /// Load `config_path` and connect using `kubeconfig`, falling back to
    /// the path in the config file
    pub async fn connect(config_path: &Path, kubeconfig: Option<PathBuf>) -> Result<Self> {
        let config = HarnessConfig::load(config_path)?;
        let kubeconfig = kubeconfig.or_else(|| config.kubeconfig.clone());
        let client = create_client(kubeconfig.as_deref()).await?;

        let submitter = Arc::new(KubeChartClient::new(client.clone()));
        let events = Arc::new(KubeEventSource::new(client.clone()));
        let orchestrator = LifecycleOrchestrator::new(
            submitter.clone(),
            events.clone(),
            config.orchestrator_config(),
        );
        let enforcer = PolicyEnforcer::new(submitter, events, config.orchestrator_config());
        Ok(Self {
            config,
            client,
            orchestrator,
            enforcer,
        })
    }

    /// Reader for aggregate queries
    pub fn aggregate_reader(&self) -> Arc<KubeAggregateReader> {
        Arc::new(KubeAggregateReader::new(self.client.clone()))
    }
}

/// Drain `session`, logging rather than masking an earlier failure.
///
/// When `outcome` already failed the cleanup error is logged and the
/// original error returned; otherwise the cleanup error is returned.
pub async fn finish_session<T>(session: &Session, outcome: Result<T>) -> Result<T> {
    info!(session = %session.name(), pending = session.len(), "Cleaning up");
    let cleanup = session.cleanup().await;
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            warn!(error = %cleanup_err, "Cleanup after failure also failed");
            Err(e)
        }
    }
}
