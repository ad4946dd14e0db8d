//! `chartwatch enforce`: apply the configured policy and check its denials

use clap::Args;
use tracing::{info, warn};

use chartwatch_lifecycle::{ConstraintTemplate, PolicyEnforcer};
use chartwatch_session::Session;

use super::{finish_session, Harness};
use crate::config::PolicyConfig;
use crate::{Error, GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct EnforceArgs {
    /// Remove the policy objects again after a successful run
    #[arg(long)]
    pub cleanup: bool,
}

pub async fn run(global: &GlobalArgs, args: EnforceArgs) -> Result<()> {
    let harness = Harness::connect(&global.config, global.kubeconfig.clone()).await?;
    let policy = harness
        .config
        .policy
        .clone()
        .ok_or_else(|| Error::validation("no policy section in config"))?;
    if policy.templates.is_empty() && policy.constraints.is_empty() {
        return Err(Error::validation("policy section names no templates or constraints"));
    }
    let templates = policy.load_templates()?;

    let session = Session::named("enforce");
    let outcome = enforce(&harness.enforcer, &session, &templates, &policy).await;

    if outcome.is_err() || args.cleanup {
        return finish_session(&session, outcome).await;
    }
    let kept = session.release();
    info!(objects = kept, "Policy enforced, leaving it in place");
    outcome
}

/// Apply every template, then every constraint, then run each denial check.
///
/// Apply failures stop the run. Denial checks all run; any that fail are
/// reported together.
pub async fn enforce(
    enforcer: &PolicyEnforcer,
    session: &Session,
    templates: &[ConstraintTemplate],
    policy: &PolicyConfig,
) -> Result<()> {
    for template in templates {
        let outcome = enforcer.apply_template(session, template).await?;
        println!(
            "{}\tCreated\t{:.1}s",
            template.selector(),
            outcome.elapsed.as_secs_f64()
        );
    }
    for constraint in &policy.constraints {
        let outcome = enforcer.apply_constraint(session, constraint).await?;
        println!(
            "{}\tEnforced\t{:.1}s",
            constraint.selector(),
            outcome.elapsed.as_secs_f64()
        );
    }

    let mut failures = Vec::new();
    for check in &policy.denials {
        match enforcer.expect_denied(session, check).await {
            Ok(_) => println!("Namespace {}\tDenied", check.namespace),
            Err(e) => {
                warn!(namespace = %check.namespace, error = %e, "Denial check failed");
                println!("Namespace {}\tNot denied", check.namespace);
                failures.push(e.to_string());
            }
        }
    }
    if !failures.is_empty() {
        return Err(Error::command_failed(format!(
            "{} of {} denial checks failed: {}",
            failures.len(),
            policy.denials.len(),
            failures.join("; ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use chartwatch_common::{Error as ChartError, ResourceKind};
    use chartwatch_events::{ChannelEventSource, ResourceSelector, WatchEvent};
    use chartwatch_lifecycle::{Constraint, DenialCheck, ManifestClient, OrchestratorConfig};

    /// Webhook that denies every namespace except `allowed`
    struct Webhook {
        allowed: &'static str,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ManifestClient for Webhook {
        async fn apply(
            &self,
            kind: &ResourceKind,
            manifest: &Value,
        ) -> std::result::Result<(), ChartError> {
            let name = manifest["metadata"]["name"].as_str().unwrap_or_default().to_string();
            self.log.lock().push(format!("apply {} {name}", kind.kind));
            if kind.kind == "Namespace" && name != self.allowed {
                return Err(ChartError::predicate(
                    format!("Namespace {name}"),
                    "admission webhook \"validation.gatekeeper.sh\" denied the request: \
                     [ns-must-be-allowed] Namespace not allowed",
                ));
            }
            Ok(())
        }

        async fn delete(
            &self,
            selector: &ResourceSelector,
        ) -> std::result::Result<(), ChartError> {
            self.log.lock().push(format!("delete {}", selector.name));
            Err(ChartError::not_found(selector.to_string()))
        }
    }

    fn object(value: Value) -> kube::api::DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    type Setup = (Arc<Webhook>, PolicyEnforcer, Vec<ConstraintTemplate>, PolicyConfig);

    fn setup(allowed: &'static str) -> Setup {
        let webhook = Arc::new(Webhook {
            allowed,
            log: Mutex::new(Vec::new()),
        });
        let source = Arc::new(ChannelEventSource::new());
        source.push_events(vec![WatchEvent::Added(object(json!({
            "apiVersion": "templates.gatekeeper.sh/v1",
            "kind": "ConstraintTemplate",
            "metadata": {"name": "k8sallowednamespaces"},
            "status": {"created": true}
        })))]);
        source.push_events(vec![WatchEvent::Added(object(json!({
            "apiVersion": "constraints.gatekeeper.sh/v1beta1",
            "kind": "K8sAllowedNamespaces",
            "metadata": {"name": "ns-must-be-allowed"},
            "status": {"byPod": [{"id": "gatekeeper-controller", "enforced": true}]}
        })))]);
        // Cleanup delete waits; the webhook reports everything already gone
        for _ in 0..3 {
            source.push_events(Vec::new());
        }

        let enforcer = PolicyEnforcer::new(
            webhook.clone(),
            source,
            OrchestratorConfig {
                watch_budget: Duration::from_secs(30),
                delete_budget: Duration::from_secs(30),
            },
        );
        let templates = vec![ConstraintTemplate::from_manifest(json!({
            "apiVersion": "templates.gatekeeper.sh/v1",
            "kind": "ConstraintTemplate",
            "metadata": {"name": "k8sallowednamespaces"}
        }))
        .unwrap()];
        let policy = PolicyConfig {
            templates: Vec::new(),
            constraints: vec![Constraint::allowed_namespaces(
                "ns-must-be-allowed",
                ["default", "kube-system"],
            )],
            denials: vec![DenialCheck {
                namespace: "not-allowed".to_string(),
                message: "[ns-must-be-allowed] Namespace not allowed".to_string(),
            }],
        };
        (webhook, enforcer, templates, policy)
    }

    /// Story: the allowed-namespaces policy goes on, a namespace outside
    /// the list is refused, and cleanup takes the policy off again.
    #[tokio::test]
    async fn story_enforce_applies_policy_then_checks_denials() {
        let (webhook, enforcer, templates, policy) = setup("default");
        let session = Session::new();

        enforce(&enforcer, &session, &templates, &policy).await.unwrap();
        session.cleanup().await.unwrap();

        assert_eq!(
            *webhook.log.lock(),
            vec![
                "apply ConstraintTemplate k8sallowednamespaces",
                "apply K8sAllowedNamespaces ns-must-be-allowed",
                "apply Namespace not-allowed",
                "delete ns-must-be-allowed",
                "delete k8sallowednamespaces",
            ]
        );
    }

    #[tokio::test]
    async fn test_admitted_namespace_fails_enforce() {
        let (webhook, enforcer, templates, policy) = setup("not-allowed");
        let session = Session::new();

        let err = enforce(&enforcer, &session, &templates, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { ref message } if message.starts_with("1 of 1")));

        // The stray namespace is removed first
        session.cleanup().await.unwrap();
        let log = webhook.log.lock();
        assert_eq!(log[3], "delete not-allowed");
    }
}
