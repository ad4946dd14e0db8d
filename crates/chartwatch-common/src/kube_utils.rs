//! Shared Kubernetes utilities using kube-rs
//!
//! Resource kinds are described by [`ResourceKind`] and resolved to a
//! kube `ApiResource` at the call site, so releases, namespaces, and
//! policy constraints all flow through the same dynamic API.

use std::path::Path;
use std::time::Duration;

use kube::api::{Api, DynamicObject};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for kube clients.
///
/// Must exceed the longest server-side watch timeout or long watches are
/// cut by the client before the server closes them.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Known irregular plurals (lowercase kind, plural)
const KIND_PLURALS: &[(&str, &str)] = &[
    ("helmrelease", "helmreleases"),
    ("namespace", "namespaces"),
    ("k8srequiredlabels", "k8srequiredlabels"),
    ("k8sallowednamespaces", "k8sallowednamespaces"),
    ("networkpolicy", "networkpolicies"),
    ("ingress", "ingresses"),
];

/// Group/version/kind of a resource type, independent of any object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKind {
    /// Full API version (e.g. "helm.toolkit.fluxcd.io/v2", "v1")
    pub api_version: String,
    /// Kind (e.g. "HelmRelease")
    pub kind: String,
    /// Plural resource name; derived from the kind when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
    /// Whether objects of this kind live outside namespaces
    #[serde(default)]
    pub cluster_scoped: bool,
}

impl ResourceKind {
    /// Create a namespaced resource kind
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            plural: None,
            cluster_scoped: false,
        }
    }

    /// Mark the kind as cluster-scoped
    pub fn cluster_scoped(mut self) -> Self {
        self.cluster_scoped = true;
        self
    }

    /// Override the plural resource name
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    /// Core `v1/Namespace`
    pub fn namespace() -> Self {
        Self::new("v1", "Namespace").cluster_scoped()
    }

    /// Build the kube `ApiResource` for this kind
    pub fn api_resource(&self) -> ApiResource {
        let mut ar = build_api_resource(&self.api_version, &self.kind);
        if let Some(plural) = &self.plural {
            ar.plural = plural.clone();
        }
        ar
    }

    /// Dynamic API handle, namespaced unless the kind is cluster-scoped
    pub fn dynamic_api(&self, client: &Client, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = self.api_resource();
        match namespace {
            Some(ns) if !self.cluster_scoped => Api::namespaced_with(client.clone(), ns, &ar),
            _ => Api::all_with(client.clone(), &ar),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Build an ApiResource from a known apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version). Core types have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Derive the plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config)
        .map_err(|e| Error::transport("create_client", format!("failed to create client: {}", e)))
}

/// Human-readable identity of an object, used in logs and errors
pub fn describe(kind: &ResourceKind, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !kind.cluster_scoped => format!("{} {}/{}", kind.kind, ns, name),
        _ => format!("{} {}", kind.kind, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_version() {
        assert_eq!(
            parse_api_version("helm.toolkit.fluxcd.io/v2"),
            ("helm.toolkit.fluxcd.io".to_string(), "v2".to_string())
        );
        assert_eq!(
            parse_api_version("v1"),
            (String::new(), "v1".to_string())
        );
    }

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("HelmRelease"), "helmreleases");
        assert_eq!(pluralize_kind("K8sRequiredLabels"), "k8srequiredlabels");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
    }

    #[test]
    fn test_resource_kind_api_resource() {
        let kind = ResourceKind::new("constraints.gatekeeper.sh/v1beta1", "K8sRequiredLabels");
        let ar = kind.api_resource();
        assert_eq!(ar.group, "constraints.gatekeeper.sh");
        assert_eq!(ar.version, "v1beta1");
        assert_eq!(ar.plural, "k8srequiredlabels");

        let custom = ResourceKind::new("example.io/v1", "Thing").with_plural("thingies");
        assert_eq!(custom.api_resource().plural, "thingies");
    }

    #[test]
    fn test_describe() {
        let release = ResourceKind::new("helm.toolkit.fluxcd.io/v2", "HelmRelease");
        assert_eq!(
            describe(&release, Some("ns"), "app"),
            "HelmRelease ns/app"
        );
        assert_eq!(
            describe(&ResourceKind::namespace(), Some("ignored"), "ns"),
            "Namespace ns"
        );
    }

    #[test]
    fn test_resource_kind_yaml_shape() {
        let kind: ResourceKind = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "clusterScoped": true
        }))
        .unwrap();
        assert_eq!(kind, ResourceKind::namespace());
    }
}
