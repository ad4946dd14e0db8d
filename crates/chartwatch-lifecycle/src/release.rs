//! Desired state of one chart release
//!
//! A [`ChartRelease`] is rendered into a Flux `HelmRelease` object. The
//! package deployment engine reconciles it and reports progress through the
//! object's `Ready` condition, which is what the orchestrator watches.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chartwatch_common::{Error, ResourceKind, LABEL_MANAGED_BY, LABEL_MANAGED_BY_CHARTWATCH};
use chartwatch_events::ResourceSelector;

/// API version of Flux HelmRelease objects
pub const HELM_RELEASE_API_VERSION: &str = "helm.toolkit.fluxcd.io/v2";

/// Kind of Flux HelmRelease objects
pub const HELM_RELEASE_KIND: &str = "HelmRelease";

/// Default reconcile interval written into every HelmRelease
pub const DEFAULT_RECONCILE_INTERVAL: &str = "5m";

/// `HelmRelease` resource kind
pub fn helm_release_kind() -> ResourceKind {
    ResourceKind::new(HELM_RELEASE_API_VERSION, HELM_RELEASE_KIND)
}

/// Chart repository the release pulls from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Source kind (HelmRepository, GitRepository, ...)
    #[serde(default = "default_source_kind")]
    pub kind: String,
    /// Source object name
    pub name: String,
    /// Source namespace; defaults to the release namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn default_source_kind() -> String {
    "HelmRepository".to_string()
}

fn default_true() -> bool {
    true
}

/// One chart to install, upgrade, or remove.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRelease {
    /// Release name, unique within the namespace
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Chart name in the source
    pub chart: String,
    /// Chart version
    pub version: String,
    /// Where the chart comes from
    pub source_ref: SourceRef,
    /// Chart values
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub values: Value,
    /// Names of releases that must be ready before this one is submitted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Create the namespace on install and delete it during cleanup
    #[serde(default = "default_true")]
    pub create_namespace: bool,
}

impl ChartRelease {
    /// Create a release with no values or dependencies
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart: impl Into<String>,
        version: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            chart: chart.into(),
            version: version.into(),
            source_ref: SourceRef {
                kind: default_source_kind(),
                name: source.into(),
                namespace: None,
            },
            values: Value::Null,
            depends_on: Vec::new(),
            create_namespace: true,
        }
    }

    /// Add a prerequisite release by name
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Replace chart values
    pub fn with_values(mut self, values: Value) -> Self {
        self.values = values;
        self
    }

    /// Copy of this release targeting another chart version
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..self.clone()
        }
    }

    /// Selector for the release object
    pub fn selector(&self) -> ResourceSelector {
        ResourceSelector::namespaced(helm_release_kind(), &self.namespace, &self.name)
    }

    /// Selector for the release namespace
    pub fn namespace_selector(&self) -> ResourceSelector {
        ResourceSelector::cluster(ResourceKind::namespace(), &self.namespace)
    }

    /// Human-readable identity used in errors and logs
    pub fn resource(&self) -> String {
        self.selector().to_string()
    }

    /// Reject releases the API server would refuse anyway
    pub fn validate(&self) -> Result<(), Error> {
        let required = [
            ("name", &self.name),
            ("namespace", &self.namespace),
            ("chart", &self.chart),
            ("version", &self.version),
            ("sourceRef.name", &self.source_ref.name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::invalid_spec(
                    self.resource(),
                    format!("{field} must not be empty"),
                ));
            }
        }
        if self.depends_on.iter().any(|d| d == &self.name) {
            return Err(Error::invalid_spec(self.resource(), "release depends on itself"));
        }
        Ok(())
    }

    /// Render the `HelmRelease` object
    pub fn to_manifest(&self) -> Value {
        let source_namespace = self
            .source_ref
            .namespace
            .clone()
            .unwrap_or_else(|| self.namespace.clone());

        let mut manifest = json!({
            "apiVersion": HELM_RELEASE_API_VERSION,
            "kind": HELM_RELEASE_KIND,
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "labels": { LABEL_MANAGED_BY: LABEL_MANAGED_BY_CHARTWATCH }
            },
            "spec": {
                "interval": DEFAULT_RECONCILE_INTERVAL,
                "releaseName": self.name,
                "chart": {
                    "spec": {
                        "chart": self.chart,
                        "version": self.version,
                        "sourceRef": {
                            "kind": self.source_ref.kind,
                            "name": self.source_ref.name,
                            "namespace": source_namespace
                        }
                    }
                },
                "install": { "crds": "CreateReplace" },
                "upgrade": { "crds": "CreateReplace" }
            }
        });
        if !self.values.is_null() {
            manifest["spec"]["values"] = self.values.clone();
        }
        manifest
    }

    /// Merge patch moving an existing `HelmRelease` to this version and values
    pub fn upgrade_patch(&self) -> Value {
        let mut patch = json!({
            "spec": { "chart": { "spec": { "version": self.version } } }
        });
        if !self.values.is_null() {
            patch["spec"]["values"] = self.values.clone();
        }
        patch
    }
}
