//! Harness configuration loaded from YAML.
//!
//! ```yaml
//! kubeconfig: /path/to/kubeconfig      # optional
//! watchBudgetSecs: 280
//! poll:
//!   attempts: 5
//!   intervalSecs: 30
//! releases:
//!   - name: rancher-gatekeeper-crd
//!     namespace: cattle-gatekeeper-system
//!     chart: rancher-gatekeeper-crd
//!     version: 102.0.0
//!     sourceRef: { name: rancher-charts, namespace: flux-system }
//!   - name: rancher-gatekeeper
//!     namespace: cattle-gatekeeper-system
//!     chart: rancher-gatekeeper
//!     version: 102.0.0
//!     sourceRef: { name: rancher-charts, namespace: flux-system }
//!     dependsOn: [rancher-gatekeeper-crd]
//!     createNamespace: false
//! constraints:
//!   - apiVersion: constraints.gatekeeper.sh/v1beta1
//!     kind: K8sRequiredLabels
//!     clusterScoped: true
//! policy:
//!   templates: [policies/allowednamespaces-template.yaml]   # relative to this file
//!   constraints:
//!     - kind: K8sAllowedNamespaces
//!       name: ns-must-be-allowed
//!       kinds: [{ apiGroups: [""], kinds: [Namespace] }]
//!       excludedNamespaces: ["pod-impersonation-helm-op-*"]
//!       parameters: { namespaces: [default, kube-system, cattle-gatekeeper-system] }
//!   denials:
//!     - namespace: not-allowed
//!       message: "[ns-must-be-allowed] Namespace not allowed"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chartwatch_common::poll::{DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use chartwatch_common::{ResourceKind, RetryPoller};
use chartwatch_events::{DEFAULT_WATCH_BUDGET, MAX_WATCH_BUDGET};
use chartwatch_lifecycle::orchestrator::validate_order;
use chartwatch_lifecycle::{
    ChartRelease, Constraint, ConstraintTemplate, DenialCheck, OrchestratorConfig,
};

use crate::{Error, Result};

/// Default harness file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "chartwatch.yaml";

/// Aggregate polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSettings {
    /// Attempts before giving up
    pub attempts: u32,
    /// Seconds between attempts
    pub interval_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}

/// Policy objects to apply and the denials they must produce
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Constraint template files, applied in order
    #[serde(default)]
    pub templates: Vec<PathBuf>,
    /// Constraints, applied after every template
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Namespaces the policy must reject
    #[serde(default)]
    pub denials: Vec<DenialCheck>,
}

impl PolicyConfig {
    /// Read every template file
    pub fn load_templates(&self) -> Result<Vec<ConstraintTemplate>> {
        self.templates
            .iter()
            .map(|path| {
                let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
                    path: path.clone(),
                    source,
                })?;
                let manifest: serde_json::Value =
                    serde_yaml::from_str(&raw).map_err(|source| Error::Yaml {
                        path: path.clone(),
                        source,
                    })?;
                Ok(ConstraintTemplate::from_manifest(manifest)?)
            })
            .collect()
    }

    fn resolve_paths(&mut self, base: &Path) {
        for template in &mut self.templates {
            if template.is_relative() {
                *template = base.join(&*template);
            }
        }
    }
}

fn default_watch_budget_secs() -> u64 {
    DEFAULT_WATCH_BUDGET.as_secs()
}

/// Everything one harness run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessConfig {
    /// Kubeconfig path; kube's default resolution applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    /// Budget for each readiness or deletion wait
    #[serde(default = "default_watch_budget_secs")]
    pub watch_budget_secs: u64,
    /// Aggregate polling
    #[serde(default)]
    pub poll: PollSettings,
    /// Releases in install order
    #[serde(default)]
    pub releases: Vec<ChartRelease>,
    /// Constraint kinds to audit
    #[serde(default)]
    pub constraints: Vec<ResourceKind>,
    /// Policy to enforce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,
}

impl HarnessConfig {
    /// Read and validate a harness file.
    ///
    /// Relative policy template paths are resolved against the file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_yaml::from_str(&raw).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        if let (Some(policy), Some(base)) = (config.policy.as_mut(), path.parent()) {
            policy.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check budgets, release ordering, and constraints
    pub fn validate(&self) -> Result<()> {
        if self.watch_budget_secs == 0 {
            return Err(Error::validation("watchBudgetSecs must be greater than 0"));
        }
        // The server ends watches at its own limit, which a longer budget would outlive
        let max = MAX_WATCH_BUDGET.as_secs();
        if self.watch_budget_secs > max {
            return Err(Error::validation(format!(
                "watchBudgetSecs must be at most {max}, got {}",
                self.watch_budget_secs
            )));
        }
        if self.poll.attempts == 0 {
            return Err(Error::validation("poll.attempts must be greater than 0"));
        }
        for release in &self.releases {
            release.validate()?;
        }
        validate_order(&self.releases)?;
        if let Some(policy) = &self.policy {
            for constraint in &policy.constraints {
                constraint.validate()?;
            }
        }
        Ok(())
    }

    /// Orchestrator budgets
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let budget = Duration::from_secs(self.watch_budget_secs);
        OrchestratorConfig {
            watch_budget: budget,
            delete_budget: budget,
        }
    }

    /// Poller for aggregate checks
    pub fn poller(&self) -> RetryPoller {
        RetryPoller::new(
            self.poll.attempts,
            Duration::from_secs(self.poll.interval_secs),
        )
    }

    /// Release named `name`
    pub fn release(&self, name: &str) -> Result<&ChartRelease> {
        self.releases
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::validation(format!("no release named {name} in config")))
    }
}
