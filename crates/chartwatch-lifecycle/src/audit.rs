//! Policy constraint audit results
//!
//! Constraint kinds are generated per policy template, so they are read as
//! loosely-typed documents and projected field by field into
//! [`ConstraintAudit`]. The audit runs on its own schedule with no event to
//! watch, so completion is detected with a [`RetryPoller`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::api::ListParams;
use kube::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use chartwatch_common::{Error, Polled, ResourceKind, RetryPoller};

/// What to list: a kind, optionally restricted to one namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateQuery {
    /// Resource kind to list
    pub kind: ResourceKind,
    /// Namespace filter; `None` lists across all namespaces
    pub namespace: Option<String>,
}

impl AggregateQuery {
    /// List `kind` across all namespaces
    pub fn all(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespace: None,
        }
    }

    /// List `kind` in one namespace
    pub fn in_namespace(kind: ResourceKind, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
        }
    }
}

/// Reads collections of objects as untyped JSON documents.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AggregateReader: Send + Sync {
    /// List every object matching `query`
    async fn list(&self, query: &AggregateQuery) -> Result<Vec<Value>, Error>;
}

/// Reader backed by the dynamic Kubernetes API
pub struct KubeAggregateReader {
    client: Client,
}

impl KubeAggregateReader {
    /// Create a reader using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AggregateReader for KubeAggregateReader {
    async fn list(&self, query: &AggregateQuery) -> Result<Vec<Value>, Error> {
        let api = query
            .kind
            .dynamic_api(&self.client, query.namespace.as_deref());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube(e, query.kind.to_string()))?;

        list.items
            .into_iter()
            .map(|obj| {
                serde_json::to_value(obj).map_err(|e| Error::decode("items", e.to_string()))
            })
            .collect()
    }
}

/// Audit status of one constraint
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintAudit {
    /// Constraint name
    pub name: String,
    /// Constraint kind (e.g. K8sRequiredLabels)
    pub kind: String,
    /// When the last audit finished; `None` until the first audit
    pub audit_timestamp: Option<DateTime<Utc>>,
    /// Violations found by the last audit
    pub total_violations: u64,
    /// `deny`, `dryrun`, or `warn`; `None` means the engine default
    pub enforcement_action: Option<String>,
}

impl ConstraintAudit {
    /// Whether at least one audit has completed
    pub fn is_audited(&self) -> bool {
        self.audit_timestamp.is_some()
    }
}

/// Project one listed constraint document.
///
/// `index` is the document's position in the list and appears in the field
/// path of any decode error.
pub fn project_constraint(index: usize, doc: &Value) -> Result<ConstraintAudit, Error> {
    let path = |field: &str| format!("items[{index}].{field}");

    let name = required_str(doc, "/metadata/name", || path("metadata.name"))?;
    let kind = required_str(doc, "/kind", || path("kind"))?;

    let audit_timestamp = match doc.pointer("/status/auditTimestamp") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|e| Error::decode(path("status.auditTimestamp"), e.to_string()))?
                .with_timezone(&Utc),
        ),
        Some(other) => {
            return Err(Error::decode(
                path("status.auditTimestamp"),
                format!("expected RFC 3339 string, got {other}"),
            ))
        }
    };

    // An audited constraint always reports a count; before the first audit there is none
    let total_violations = match doc.pointer("/status/totalViolations") {
        None | Some(Value::Null) if audit_timestamp.is_some() => {
            return Err(Error::decode(path("status.totalViolations"), "missing"))
        }
        None | Some(Value::Null) => 0,
        Some(v) => v.as_u64().ok_or_else(|| {
            Error::decode(
                path("status.totalViolations"),
                format!("expected non-negative integer, got {v}"),
            )
        })?,
    };

    let enforcement_action = match doc.pointer("/spec/enforcementAction") {
        None | Some(Value::Null) => None,
        Some(Value::String(action)) => Some(action.clone()),
        Some(other) => {
            return Err(Error::decode(
                path("spec.enforcementAction"),
                format!("expected string, got {other}"),
            ))
        }
    };

    Ok(ConstraintAudit {
        name,
        kind,
        audit_timestamp,
        total_violations,
        enforcement_action,
    })
}

/// Project every document in a listed collection
pub fn project_constraints(docs: &[Value]) -> Result<Vec<ConstraintAudit>, Error> {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| project_constraint(i, doc))
        .collect()
}

fn required_str(
    doc: &Value,
    pointer: &str,
    field: impl Fn() -> String,
) -> Result<String, Error> {
    match doc.pointer(pointer) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(other) => Err(Error::decode(field(), format!("expected non-empty string, got {other}"))),
        None => Err(Error::decode(field(), "missing")),
    }
}

/// Polls constraint kinds until every constraint has been audited.
#[derive(Clone)]
pub struct ConstraintAuditor {
    reader: Arc<dyn AggregateReader>,
    poller: RetryPoller,
}

impl ConstraintAuditor {
    /// Create an auditor
    pub fn new(reader: Arc<dyn AggregateReader>, poller: RetryPoller) -> Self {
        Self { reader, poller }
    }

    /// Read the current audit status of every constraint of `kinds`
    pub async fn snapshot(&self, kinds: &[ResourceKind]) -> Result<Vec<ConstraintAudit>, Error> {
        let mut audits = Vec::new();
        for kind in kinds {
            let docs = self.reader.list(&AggregateQuery::all(kind.clone())).await?;
            audits.extend(project_constraints(&docs)?);
        }
        debug!(constraints = audits.len(), "Read constraint audits");
        Ok(audits)
    }

    /// Poll until at least one constraint exists and all have an audit
    /// timestamp.
    ///
    /// When attempts run out the last snapshot is returned with
    /// `ready = false`; callers decide whether that is acceptable.
    pub async fn wait_for_audit(
        &self,
        kinds: &[ResourceKind],
    ) -> Result<Polled<Vec<ConstraintAudit>>, Error> {
        let polled = self
            .poller
            .poll(
                "constraint_audit",
                || self.snapshot(kinds),
                |audits: &Vec<ConstraintAudit>| {
                    !audits.is_empty() && audits.iter().all(ConstraintAudit::is_audited)
                },
            )
            .await?;

        info!(
            constraints = polled.value.len(),
            violations = total_violations(&polled.value),
            ready = polled.ready,
            attempts = polled.attempts,
            "Constraint audit poll finished"
        );
        Ok(polled)
    }
}

/// Sum of violations across `audits`
pub fn total_violations(audits: &[ConstraintAudit]) -> u64 {
    audits.iter().map(|a| a.total_violations).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn required_labels() -> ResourceKind {
        ResourceKind::new("constraints.gatekeeper.sh/v1beta1", "K8sRequiredLabels").cluster_scoped()
    }

    fn constraint(status: Value) -> Value {
        json!({
            "apiVersion": "constraints.gatekeeper.sh/v1beta1",
            "kind": "K8sRequiredLabels",
            "metadata": {"name": "all-must-have-owner"},
            "spec": {"enforcementAction": "deny"},
            "status": status
        })
    }

    #[test]
    fn story_audited_constraint_projects_to_typed_record() {
        let doc = constraint(json!({
            "auditTimestamp": "2024-03-01T10:15:00Z",
            "totalViolations": 12,
            "byPod": [{"id": "gatekeeper-audit-0"}]
        }));

        let audit = project_constraint(0, &doc).unwrap();

        assert_eq!(audit.name, "all-must-have-owner");
        assert_eq!(audit.kind, "K8sRequiredLabels");
        assert_eq!(audit.total_violations, 12);
        assert_eq!(audit.enforcement_action.as_deref(), Some("deny"));
        assert_eq!(
            audit.audit_timestamp.map(|t| t.to_rfc3339()),
            Some("2024-03-01T10:15:00+00:00".to_string())
        );
    }

    #[test]
    fn test_unaudited_constraint_has_no_timestamp() {
        let audit = project_constraint(0, &constraint(json!({"byPod": []}))).unwrap();
        assert!(!audit.is_audited());
        assert_eq!(audit.total_violations, 0);
    }

    /// Story: an audit that finished but reported no count must not read as
    /// a clean audit with zero violations.
    #[test]
    fn story_audited_constraint_without_count_is_decode_error() {
        let doc = constraint(json!({"auditTimestamp": "2024-03-01T10:15:00Z"}));
        assert!(matches!(
            project_constraint(2, &doc),
            Err(Error::Decode { ref field, ref message })
                if field == "items[2].status.totalViolations" && message == "missing"
        ));

        let null_count = constraint(json!({
            "auditTimestamp": "2024-03-01T10:15:00Z",
            "totalViolations": null
        }));
        assert!(matches!(project_constraint(0, &null_count), Err(Error::Decode { .. })));

        let clean = constraint(json!({
            "auditTimestamp": "2024-03-01T10:15:00Z",
            "totalViolations": 0
        }));
        assert_eq!(project_constraint(0, &clean).unwrap().total_violations, 0);
    }

    #[test]
    fn story_decode_errors_name_the_offending_field() {
        let bad_count = constraint(json!({"totalViolations": "twelve"}));
        match project_constraints(&[constraint(json!({})), bad_count]).unwrap_err() {
            Error::Decode { field, .. } => assert_eq!(field, "items[1].status.totalViolations"),
            other => panic!("expected decode error, got {other:?}"),
        }

        let bad_time = constraint(json!({"auditTimestamp": "yesterday"}));
        assert!(matches!(
            project_constraint(0, &bad_time),
            Err(Error::Decode { ref field, .. }) if field == "items[0].status.auditTimestamp"
        ));

        let nameless = json!({"kind": "K8sRequiredLabels", "metadata": {}});
        assert!(matches!(
            project_constraint(3, &nameless),
            Err(Error::Decode { ref field, .. }) if field == "items[3].metadata.name"
        ));
    }

    /// Story: the audit controller needs a few cycles before it reports;
    /// polling stops on the first complete snapshot instead of sleeping a
    /// fixed time.
    #[tokio::test(start_paused = true)]
    async fn story_polls_until_every_constraint_is_audited() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut reader = MockAggregateReader::new();
        reader.expect_list().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(match n {
                1 => vec![],
                2 => vec![constraint(json!({}))],
                _ => vec![constraint(json!({
                    "auditTimestamp": "2024-03-01T10:15:00Z",
                    "totalViolations": 4
                }))],
            })
        });

        let auditor = ConstraintAuditor::new(
            Arc::new(reader),
            RetryPoller::new(5, Duration::from_secs(30)),
        );
        let polled = auditor.wait_for_audit(&[required_labels()]).await.unwrap();

        assert!(polled.ready);
        assert_eq!(polled.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(total_violations(&polled.value), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_poll_returns_last_snapshot() {
        let mut reader = MockAggregateReader::new();
        reader
            .expect_list()
            .times(2)
            .returning(|_| Ok(vec![constraint(json!({}))]));

        let auditor = ConstraintAuditor::new(
            Arc::new(reader),
            RetryPoller::new(2, Duration::from_secs(1)),
        );
        let polled = auditor.wait_for_audit(&[required_labels()]).await.unwrap();

        assert!(!polled.ready);
        assert_eq!(polled.value.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_error_stops_polling() {
        let mut reader = MockAggregateReader::new();
        reader
            .expect_list()
            .times(1)
            .returning(|_| Ok(vec![json!({"kind": "K8sRequiredLabels"})]));

        let auditor = ConstraintAuditor::new(Arc::new(reader), RetryPoller::default());
        let err = auditor
            .wait_for_audit(&[required_labels()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
