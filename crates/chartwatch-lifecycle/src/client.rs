//! Mutation submission for chart releases
//!
//! Provides a trait-based abstraction so orchestrator tests can script the
//! cluster while production code talks to the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use chartwatch_common::kube_utils::describe;
use chartwatch_common::retry::{retry_with_backoff, RetryConfig};
use chartwatch_common::{
    Error, ResourceKind, FIELD_MANAGER, LABEL_MANAGED_BY, LABEL_MANAGED_BY_CHARTWATCH,
};
use chartwatch_events::ResourceSelector;

use crate::release::{helm_release_kind, ChartRelease};

/// Submits release and namespace mutations.
///
/// Implementations report failures through the shared taxonomy: a delete of
/// something already gone is [`Error::NotFound`], a create colliding with an
/// existing object is [`Error::AlreadyExists`], and an admission denial is
/// [`Error::Predicate`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartClient: Send + Sync {
    /// Create the release object
    async fn install(&self, release: &ChartRelease) -> Result<(), Error>;

    /// Move an existing release to the version and values in `release`
    async fn upgrade(&self, release: &ChartRelease) -> Result<(), Error>;

    /// Delete the release object
    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Create the namespace if it does not exist
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), Error>;

    /// Delete the namespace
    async fn delete_namespace(&self, namespace: &str) -> Result<(), Error>;
}

/// Applies and deletes arbitrary objects, such as policy templates and
/// constraints, by kind.
///
/// Failures follow the same taxonomy as [`ChartClient`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestClient: Send + Sync {
    /// Server-side apply `manifest` as an object of `kind`
    async fn apply(&self, kind: &ResourceKind, manifest: &Value) -> Result<(), Error>;

    /// Delete the selected object
    async fn delete(&self, selector: &ResourceSelector) -> Result<(), Error>;
}

/// Real client managing Flux `HelmRelease` objects through the dynamic API
pub struct KubeChartClient {
    client: Client,
    retry: RetryConfig,
}

impl KubeChartClient {
    /// Create a new KubeChartClient
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
        }
    }

    /// Override the backoff used for idempotent calls
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn releases(&self, namespace: &str) -> Api<DynamicObject> {
        helm_release_kind().dynamic_api(&self.client, Some(namespace))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ChartClient for KubeChartClient {
    async fn install(&self, release: &ChartRelease) -> Result<(), Error> {
        let resource = release.resource();
        let obj: DynamicObject = serde_json::from_value(release.to_manifest())
            .map_err(|e| Error::invalid_spec(&resource, e.to_string()))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        // Not retried: a create that timed out may have landed
        self.releases(&release.namespace)
            .create(&params, &obj)
            .await
            .map_err(|e| Error::from_kube(e, &resource))?;

        info!(release = %release.name, namespace = %release.namespace, version = %release.version, "Submitted install");
        Ok(())
    }

    async fn upgrade(&self, release: &ChartRelease) -> Result<(), Error> {
        let resource = release.resource();
        let api = self.releases(&release.namespace);
        let patch = release.upgrade_patch();

        retry_with_backoff(&self.retry, "upgrade_release", || {
            let api = api.clone();
            let patch = patch.clone();
            let resource = resource.clone();
            async move {
                api.patch(
                    &release.name,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await
                .map(|_| ())
                .map_err(|e| Error::from_kube(e, resource))
            }
        })
        .await?;

        info!(release = %release.name, namespace = %release.namespace, version = %release.version, "Submitted upgrade");
        Ok(())
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let resource = describe(&helm_release_kind(), Some(namespace), name);
        let api = self.releases(namespace);

        retry_with_backoff(&self.retry, "uninstall_release", || {
            let api = api.clone();
            let resource = resource.clone();
            async move {
                api.delete(name, &DeleteParams::background())
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::from_kube(e, resource))
            }
        })
        .await?;

        info!(release = %name, namespace = %namespace, "Submitted uninstall");
        Ok(())
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), Error> {
        let resource = describe(&ResourceKind::namespace(), None, namespace);
        let api = self.namespaces();
        let ns = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": namespace,
                "labels": { LABEL_MANAGED_BY: LABEL_MANAGED_BY_CHARTWATCH }
            }
        });

        // Server-side apply never fails on "already exists"
        retry_with_backoff(&self.retry, "ensure_namespace", || {
            let api = api.clone();
            let ns = ns.clone();
            let resource = resource.clone();
            async move {
                api.patch(namespace, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::from_kube(e, resource))
            }
        })
        .await?;

        debug!(namespace = %namespace, "Namespace ensured");
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), Error> {
        let resource = describe(&ResourceKind::namespace(), None, namespace);
        let api = self.namespaces();

        retry_with_backoff(&self.retry, "delete_namespace", || {
            let api = api.clone();
            let resource = resource.clone();
            async move {
                api.delete(namespace, &DeleteParams::background())
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::from_kube(e, resource))
            }
        })
        .await?;

        info!(namespace = %namespace, "Submitted namespace deletion");
        Ok(())
    }
}

#[async_trait]
impl ManifestClient for KubeChartClient {
    async fn apply(&self, kind: &ResourceKind, manifest: &Value) -> Result<(), Error> {
        let name = manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_spec(&kind.kind, "metadata.name is required"))?;
        let namespace = manifest.pointer("/metadata/namespace").and_then(Value::as_str);
        let resource = describe(kind, namespace, name);
        let api = kind.dynamic_api(&self.client, namespace);

        retry_with_backoff(&self.retry, "apply_manifest", || {
            let api = api.clone();
            let resource = resource.clone();
            async move {
                api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(manifest))
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::from_kube(e, resource))
            }
        })
        .await?;

        info!(resource = %resource, "Applied manifest");
        Ok(())
    }

    async fn delete(&self, selector: &ResourceSelector) -> Result<(), Error> {
        let resource = selector.to_string();
        let api = selector
            .kind
            .dynamic_api(&self.client, selector.namespace.as_deref());

        retry_with_backoff(&self.retry, "delete_manifest", || {
            let api = api.clone();
            let resource = resource.clone();
            async move {
                api.delete(&selector.name, &DeleteParams::background())
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::from_kube(e, resource))
            }
        })
        .await?;

        info!(resource = %resource, "Submitted deletion");
        Ok(())
    }
}
