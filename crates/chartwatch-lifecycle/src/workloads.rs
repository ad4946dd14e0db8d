//! Workload readiness in a release namespace
//!
//! A chart reporting ready does not always mean its pods are serving. This
//! polls the namespace's Deployments and DaemonSets until each reports its
//! desired number of available replicas.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use chartwatch_common::{Error, Polled, ResourceKind, RetryPoller};

use crate::audit::{AggregateQuery, AggregateReader};

/// Availability of one workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// Workload kind (Deployment or DaemonSet)
    pub kind: &'static str,
    /// Workload name
    pub name: String,
    /// Replicas the workload should run
    pub desired: i32,
    /// Replicas currently available
    pub available: i32,
}

impl WorkloadStatus {
    /// Whether every desired replica is available
    pub fn is_ready(&self) -> bool {
        self.available >= self.desired
    }
}

/// Polls Deployments and DaemonSets until they are available.
#[derive(Clone)]
pub struct WorkloadReadiness {
    reader: Arc<dyn AggregateReader>,
    poller: RetryPoller,
}

impl WorkloadReadiness {
    /// Create a readiness checker
    pub fn new(reader: Arc<dyn AggregateReader>, poller: RetryPoller) -> Self {
        Self { reader, poller }
    }

    /// Current status of every workload in `namespace`
    pub async fn snapshot(&self, namespace: &str) -> Result<Vec<WorkloadStatus>, Error> {
        let deployments: Vec<Deployment> = self
            .typed(ResourceKind::new("apps/v1", "Deployment"), namespace)
            .await?;
        let daemonsets: Vec<DaemonSet> = self
            .typed(ResourceKind::new("apps/v1", "DaemonSet"), namespace)
            .await?;

        let mut statuses: Vec<WorkloadStatus> =
            deployments.iter().map(deployment_status).collect();
        statuses.extend(daemonsets.iter().map(daemonset_status));
        Ok(statuses)
    }

    /// Poll until every workload in `namespace` is available.
    ///
    /// An empty namespace is not ready: the chart has not created anything
    /// yet.
    pub async fn wait_ready(&self, namespace: &str) -> Result<Polled<Vec<WorkloadStatus>>, Error> {
        self.poller
            .poll(
                "workload_readiness",
                || self.snapshot(namespace),
                |statuses: &Vec<WorkloadStatus>| {
                    !statuses.is_empty() && statuses.iter().all(WorkloadStatus::is_ready)
                },
            )
            .await
    }

    async fn typed<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<T>, Error> {
        let label = kind.kind.clone();
        let docs = self
            .reader
            .list(&AggregateQuery::in_namespace(kind, namespace))
            .await?;
        debug!(kind = %label, namespace = %namespace, count = docs.len(), "Listed workloads");
        docs.into_iter()
            .enumerate()
            .map(|(i, doc): (usize, Value)| {
                serde_json::from_value(doc)
                    .map_err(|e| Error::decode(format!("{label}[{i}]"), e.to_string()))
            })
            .collect()
    }
}

fn deployment_status(d: &Deployment) -> WorkloadStatus {
    let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = d.status.as_ref();
    let observed = status.and_then(|s| s.observed_generation).unwrap_or(0);
    let generation = d.metadata.generation.unwrap_or(0);
    // A stale status describes the previous spec
    let available = if observed >= generation {
        status.and_then(|s| s.available_replicas).unwrap_or(0)
    } else {
        0
    };
    WorkloadStatus {
        kind: "Deployment",
        name: d.metadata.name.clone().unwrap_or_default(),
        desired,
        available,
    }
}

fn daemonset_status(ds: &DaemonSet) -> WorkloadStatus {
    let status = ds.status.as_ref();
    WorkloadStatus {
        kind: "DaemonSet",
        name: ds.metadata.name.clone().unwrap_or_default(),
        desired: status.map(|s| s.desired_number_scheduled).unwrap_or(0),
        available: status.and_then(|s| s.number_available).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MockAggregateReader;
    use serde_json::json;
    use std::time::Duration;

    fn deployment(name: &str, replicas: i32, available: i32) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "cattle-gatekeeper-system", "generation": 1},
            "spec": {
                "replicas": replicas,
                "selector": {"matchLabels": {"app": name}},
                "template": {"metadata": {"labels": {"app": name}}}
            },
            "status": {"observedGeneration": 1, "availableReplicas": available}
        })
    }

    fn daemonset(name: &str, desired: i32, available: i32) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {"name": name},
            "spec": {
                "selector": {"matchLabels": {"app": name}},
                "template": {"metadata": {"labels": {"app": name}}}
            },
            "status": {
                "currentNumberScheduled": desired,
                "desiredNumberScheduled": desired,
                "numberMisscheduled": 0,
                "numberReady": available,
                "numberAvailable": available
            }
        })
    }

    fn reader_with(deployments: Vec<Value>, daemonsets: Vec<Value>) -> MockAggregateReader {
        let mut reader = MockAggregateReader::new();
        reader
            .expect_list()
            .withf(|q: &AggregateQuery| q.kind.kind == "Deployment")
            .returning(move |_| Ok(deployments.clone()));
        reader
            .expect_list()
            .withf(|q: &AggregateQuery| q.kind.kind == "DaemonSet")
            .returning(move |_| Ok(daemonsets.clone()));
        reader
    }

    #[tokio::test]
    async fn test_snapshot_reads_both_kinds() {
        let reader = reader_with(
            vec![deployment("gatekeeper-controller-manager", 3, 2)],
            vec![daemonset("node-agent", 2, 2)],
        );
        let readiness = WorkloadReadiness::new(Arc::new(reader), RetryPoller::default());

        let statuses = readiness.snapshot("cattle-gatekeeper-system").await.unwrap();

        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].is_ready());
        assert_eq!(statuses[0].desired, 3);
        assert!(statuses[1].is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn story_unavailable_deployment_is_reported_not_ready() {
        let reader = reader_with(vec![deployment("gatekeeper-audit", 1, 0)], vec![]);
        let readiness = WorkloadReadiness::new(
            Arc::new(reader),
            RetryPoller::new(3, Duration::from_secs(10)),
        );

        let polled = readiness.wait_ready("cattle-gatekeeper-system").await.unwrap();

        assert!(!polled.ready);
        assert_eq!(polled.attempts, 3);
        assert_eq!(polled.value[0].name, "gatekeeper-audit");
    }

    #[tokio::test]
    async fn test_stale_generation_counts_as_unavailable() {
        let mut stale = deployment("gatekeeper-audit", 1, 1);
        stale["metadata"]["generation"] = json!(2);
        let reader = reader_with(vec![stale], vec![]);
        let readiness = WorkloadReadiness::new(Arc::new(reader), RetryPoller::default());

        let statuses = readiness.snapshot("ns").await.unwrap();
        assert_eq!(statuses[0].available, 0);
    }
}
