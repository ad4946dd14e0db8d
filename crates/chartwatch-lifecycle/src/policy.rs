//! Gatekeeper policy objects and admission checks
//!
//! A [`ConstraintTemplate`] teaches the policy controller a new constraint
//! kind; a [`Constraint`] is an instance of that kind. [`PolicyEnforcer`]
//! applies both with their deletes registered on a [`Session`] first, the
//! same way releases are installed, and [`PolicyEnforcer::expect_denied`]
//! confirms the admission webhook turns away a namespace the policy
//! forbids.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use chartwatch_common::{Error, ResourceKind, LABEL_MANAGED_BY, LABEL_MANAGED_BY_CHARTWATCH};
use chartwatch_events::predicates::{self, Predicate};
use chartwatch_events::{
    ConditionWaiter, EventSource, EventWatcher, ResourceSelector, WaitOutcome, WaitSpec,
};
use chartwatch_session::Session;

use crate::client::ManifestClient;
use crate::orchestrator::OrchestratorConfig;

/// API version of Gatekeeper constraint templates
pub const TEMPLATE_API_VERSION: &str = "templates.gatekeeper.sh/v1";

/// API version of Gatekeeper constraints
pub const CONSTRAINT_API_VERSION: &str = "constraints.gatekeeper.sh/v1beta1";

/// Kind of Gatekeeper constraint templates
pub fn constraint_template_kind() -> ResourceKind {
    ResourceKind::new(TEMPLATE_API_VERSION, "ConstraintTemplate").cluster_scoped()
}

/// A constraint template manifest, usually read from a file.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintTemplate {
    name: String,
    manifest: Value,
}

impl ConstraintTemplate {
    /// Wrap a manifest, checking it is a named `ConstraintTemplate`
    pub fn from_manifest(manifest: Value) -> Result<Self, Error> {
        match manifest.get("kind").and_then(Value::as_str) {
            Some("ConstraintTemplate") => {}
            Some(other) => {
                return Err(Error::decode(
                    "kind",
                    format!("expected ConstraintTemplate, found {other}"),
                ))
            }
            None => return Err(Error::decode("kind", "missing")),
        }
        let name = manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::decode("metadata.name", "missing"))?
            .to_string();
        Ok(Self { name, manifest })
    }

    /// Template name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Manifest as applied
    pub fn manifest(&self) -> &Value {
        &self.manifest
    }

    /// Selector for the template object
    pub fn selector(&self) -> ResourceSelector {
        ResourceSelector::cluster(constraint_template_kind(), &self.name)
    }
}

/// Resource kinds a constraint applies to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindMatch {
    /// API groups; `""` is the core group
    #[serde(default)]
    pub api_groups: Vec<String>,
    /// Kinds within those groups
    pub kinds: Vec<String>,
}

fn default_constraint_api_version() -> String {
    CONSTRAINT_API_VERSION.to_string()
}

fn default_enforcement_action() -> String {
    "deny".to_string()
}

/// An instance of a constraint kind created by a template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    /// API version
    #[serde(default = "default_constraint_api_version")]
    pub api_version: String,
    /// Constraint kind (e.g. K8sAllowedNamespaces)
    pub kind: String,
    /// Object name; appears in denial messages as `[name]`
    pub name: String,
    /// What the webhook does on a violation
    #[serde(default = "default_enforcement_action")]
    pub enforcement_action: String,
    /// Objects the constraint matches
    #[serde(default)]
    pub kinds: Vec<KindMatch>,
    /// Namespaces the constraint ignores (globs allowed)
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
    /// Template-specific parameters
    #[serde(default)]
    pub parameters: Value,
}

impl Constraint {
    /// Denying constraint of `kind` named `name` with no matches yet
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: default_constraint_api_version(),
            kind: kind.into(),
            name: name.into(),
            enforcement_action: default_enforcement_action(),
            kinds: Vec::new(),
            excluded_namespaces: Vec::new(),
            parameters: Value::Null,
        }
    }

    /// `K8sAllowedNamespaces` constraint that denies every namespace not
    /// listed in `allowed`
    pub fn allowed_namespaces<I, S>(name: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: Vec<String> = allowed.into_iter().map(Into::into).collect();
        Self {
            kinds: vec![KindMatch {
                api_groups: vec![String::new()],
                kinds: vec!["Namespace".to_string()],
            }],
            parameters: json!({ "namespaces": allowed }),
            ..Self::new("K8sAllowedNamespaces", name)
        }
    }

    /// Skip namespaces matching `pattern`
    pub fn excluding(mut self, pattern: impl Into<String>) -> Self {
        self.excluded_namespaces.push(pattern.into());
        self
    }

    /// Kind as an API resource; constraints are cluster-scoped
    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::new(&self.api_version, &self.kind).cluster_scoped()
    }

    /// Selector for the constraint object
    pub fn selector(&self) -> ResourceSelector {
        ResourceSelector::cluster(self.resource_kind(), &self.name)
    }

    /// Reject constraints the API server would refuse anyway
    pub fn validate(&self) -> Result<(), Error> {
        for (field, value) in [
            ("apiVersion", &self.api_version),
            ("kind", &self.kind),
            ("name", &self.name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_spec(
                    self.selector().to_string(),
                    format!("{field} must not be empty"),
                ));
            }
        }
        Ok(())
    }

    /// Manifest submitted to the API server
    pub fn to_manifest(&self) -> Value {
        let mut matcher = json!({ "kinds": self.kinds });
        if !self.excluded_namespaces.is_empty() {
            matcher["excludedNamespaces"] = json!(self.excluded_namespaces);
        }
        let mut spec = json!({
            "enforcementAction": self.enforcement_action,
            "match": matcher,
        });
        if !self.parameters.is_null() {
            spec["parameters"] = self.parameters.clone();
        }
        json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "metadata": {
                "name": self.name,
                "labels": { LABEL_MANAGED_BY: LABEL_MANAGED_BY_CHARTWATCH }
            },
            "spec": spec,
        })
    }
}

/// A namespace the webhook must reject, and text the denial must contain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialCheck {
    /// Namespace to attempt
    pub namespace: String,
    /// Substring expected in the denial message
    pub message: String,
}

/// Satisfied once the controller has created the template's constraint kind
pub fn template_created() -> Predicate {
    predicates::field_equals("/status/created", Value::Bool(true))
}

/// Satisfied once every policy pod reports the constraint enforced
pub fn constraint_enforced() -> Predicate {
    predicates::from_fn(|event| {
        let by_pod = event
            .live_object()
            .and_then(|obj| obj.data.pointer("/status/byPod"))
            .and_then(Value::as_array);
        Ok(match by_pod {
            Some(pods) if !pods.is_empty() => pods
                .iter()
                .all(|pod| pod.get("enforced").and_then(Value::as_bool) == Some(true)),
            _ => false,
        })
    })
}

/// Applies policy objects and checks admission outcomes.
#[derive(Clone)]
pub struct PolicyEnforcer {
    client: Arc<dyn ManifestClient>,
    waiter: ConditionWaiter,
    config: OrchestratorConfig,
}

impl PolicyEnforcer {
    /// Create an enforcer applying through `client` and watching through
    /// `source`
    pub fn new(
        client: Arc<dyn ManifestClient>,
        source: Arc<dyn EventSource>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            waiter: ConditionWaiter::new(EventWatcher::new(source)),
            config,
        }
    }

    /// Apply `template` and wait until its constraint kind exists.
    ///
    /// The delete is registered on `session` before anything is applied.
    pub async fn apply_template(
        &self,
        session: &Session,
        template: &ConstraintTemplate,
    ) -> Result<WaitOutcome, Error> {
        let selector = template.selector();
        self.register_delete(session, selector.clone());

        let armed = self
            .waiter
            .arm(WaitSpec::new(selector, self.config.watch_budget, template_created()))
            .await?;
        info!(template = %template.name(), "Applying constraint template");
        self.client
            .apply(&constraint_template_kind(), template.manifest())
            .await?;
        armed.run().await
    }

    /// Apply `constraint` and wait until it is enforced.
    ///
    /// The delete is registered on `session` before anything is applied.
    pub async fn apply_constraint(
        &self,
        session: &Session,
        constraint: &Constraint,
    ) -> Result<WaitOutcome, Error> {
        constraint.validate()?;
        let selector = constraint.selector();
        self.register_delete(session, selector.clone());

        let armed = self
            .waiter
            .arm(WaitSpec::new(selector, self.config.watch_budget, constraint_enforced()))
            .await?;
        info!(kind = %constraint.kind, constraint = %constraint.name, "Applying constraint");
        self.client
            .apply(&constraint.resource_kind(), &constraint.to_manifest())
            .await?;
        armed.run().await
    }

    /// Try to create `check.namespace` and require an admission denial
    /// containing `check.message`. Returns the full denial message.
    ///
    /// A namespace that is admitted after all is registered for deletion on
    /// `session` and reported as a [`Error::Predicate`].
    pub async fn expect_denied(
        &self,
        session: &Session,
        check: &DenialCheck,
    ) -> Result<String, Error> {
        let kind = ResourceKind::namespace();
        let selector = ResourceSelector::cluster(kind.clone(), &check.namespace);
        let manifest = json!({
            "apiVersion": kind.api_version,
            "kind": kind.kind,
            "metadata": {
                "name": check.namespace,
                "labels": { LABEL_MANAGED_BY: LABEL_MANAGED_BY_CHARTWATCH }
            }
        });

        match self.client.apply(&kind, &manifest).await {
            Err(Error::Predicate { message, .. }) if message.contains(&check.message) => {
                info!(namespace = %check.namespace, "Namespace denied as expected");
                Ok(message)
            }
            Err(Error::Predicate { resource, message }) => Err(Error::predicate(
                resource,
                format!("denied, but without {:?}: {message}", check.message),
            )),
            Err(e) => Err(e),
            Ok(()) => {
                warn!(namespace = %check.namespace, "Namespace admitted, expected a denial");
                self.register_delete(session, selector.clone());
                Err(Error::predicate(
                    selector.to_string(),
                    format!("admitted, expected a denial containing {:?}", check.message),
                ))
            }
        }
    }

    fn register_delete(&self, session: &Session, selector: ResourceSelector) {
        let this = self.clone();
        session.register(format!("delete {selector}"), move || async move {
            this.remove(&selector).await
        });
    }

    /// Delete an object and wait for it to disappear; absent is success
    async fn remove(&self, selector: &ResourceSelector) -> Result<(), Error> {
        let armed = self
            .waiter
            .arm(WaitSpec::new(
                selector.clone(),
                self.config.delete_budget,
                predicates::deleted(),
            ))
            .await?;
        match self.client.delete(selector).await {
            Ok(()) => armed.run().await.map(|_| ()),
            Err(e) if e.is_not_found() => {
                debug!(resource = %selector, "Already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
