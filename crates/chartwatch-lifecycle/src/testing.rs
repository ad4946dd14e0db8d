//! In-memory cluster used by orchestrator tests.
//!
//! Implements both mutation submission and event subscription, so a
//! mutation immediately fans out events to every open watch on the same
//! object, the way the API server would.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::DynamicObject;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use chartwatch_common::Error;
use chartwatch_events::{EventSource, EventStream, ResourceSelector, WatchEvent};

use crate::client::ChartClient;
use crate::release::{ChartRelease, HELM_RELEASE_API_VERSION, HELM_RELEASE_KIND};

/// How the fake controller reacts to a submitted release
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behaviour {
    /// Report Ready=True right away
    Ready,
    /// Report Ready=False with reason InstallFailed
    Fail,
    /// Never report a Ready condition
    Hang,
}

struct StoredRelease {
    version: String,
    generation: i64,
}

#[derive(Default)]
struct State {
    releases: HashMap<(String, String), StoredRelease>,
    namespaces: HashSet<String>,
    behaviours: HashMap<String, Behaviour>,
    watchers: Vec<(ResourceSelector, mpsc::UnboundedSender<Result<WatchEvent, Error>>)>,
    log: Vec<String>,
}

/// Scripted cluster
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how the controller reacts to release `name`
    pub fn behave(&self, name: &str, behaviour: Behaviour) {
        self.state
            .lock()
            .behaviours
            .insert(name.to_string(), behaviour);
    }

    /// Mutations submitted so far, e.g. "install demo/app"
    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Mutations whose entry starts with `verb`
    pub fn submitted(&self, verb: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix(&format!("{verb} ")).map(str::to_string))
            .collect()
    }

    pub fn has_release(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .releases
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.state.lock().namespaces.contains(namespace)
    }

    pub fn open_watches(&self) -> usize {
        let mut state = self.state.lock();
        state.watchers.retain(|(_, tx)| !tx.is_closed());
        state.watchers.len()
    }
}

fn release_object(namespace: &str, name: &str, stored: &StoredRelease, ready: Option<(&str, &str)>) -> DynamicObject {
    let mut status = json!({
        "observedGeneration": stored.generation,
        "history": [{"chartVersion": stored.version}]
    });
    if let Some((status_value, reason)) = ready {
        status["conditions"] = json!([{
            "type": "Ready",
            "status": status_value,
            "reason": reason,
            "message": format!("{reason} for {name}")
        }]);
    }
    object(json!({
        "apiVersion": HELM_RELEASE_API_VERSION,
        "kind": HELM_RELEASE_KIND,
        "metadata": {"name": name, "namespace": namespace, "generation": stored.generation},
        "status": status
    }))
}

fn namespace_object(name: &str) -> DynamicObject {
    object(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": name},
        "status": {"phase": "Active"}
    }))
}

fn object(value: serde_json::Value) -> DynamicObject {
    serde_json::from_value(value).expect("fixture object is valid")
}

fn matches(selector: &ResourceSelector, kind: &str, namespace: Option<&str>, name: &str) -> bool {
    selector.kind.kind == kind
        && selector.name == name
        && (selector.kind.cluster_scoped || selector.namespace.as_deref() == namespace)
}

impl State {
    fn emit(&mut self, kind: &str, namespace: Option<&str>, name: &str, event: WatchEvent) {
        self.watchers.retain(|(selector, tx)| {
            if matches(selector, kind, namespace, name) {
                tx.send(Ok(event.clone())).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    fn emit_release_progress(&mut self, namespace: &str, name: &str, modified: bool) {
        let behaviour = self
            .behaviours
            .get(name)
            .copied()
            .unwrap_or(Behaviour::Ready);
        let key = (namespace.to_string(), name.to_string());
        let Some(stored) = self.releases.get(&key) else {
            return;
        };
        let first = release_object(namespace, name, stored, None);
        let next = match behaviour {
            Behaviour::Ready => Some(release_object(namespace, name, stored, Some(("True", "InstallSucceeded")))),
            Behaviour::Fail => Some(release_object(namespace, name, stored, Some(("False", "InstallFailed")))),
            Behaviour::Hang => None,
        };
        let first = if modified {
            WatchEvent::Modified(first)
        } else {
            WatchEvent::Added(first)
        };
        self.emit(HELM_RELEASE_KIND, Some(namespace), name, first);
        if let Some(next) = next {
            self.emit(HELM_RELEASE_KIND, Some(namespace), name, WatchEvent::Modified(next));
        }
    }
}

#[async_trait]
impl ChartClient for FakeCluster {
    async fn install(&self, release: &ChartRelease) -> Result<(), Error> {
        let mut state = self.state.lock();
        let key = (release.namespace.clone(), release.name.clone());
        state
            .log
            .push(format!("install {}/{}", release.namespace, release.name));
        if state.releases.contains_key(&key) {
            return Err(Error::already_exists(release.resource()));
        }
        state.releases.insert(
            key,
            StoredRelease {
                version: release.version.clone(),
                generation: 1,
            },
        );
        state.emit_release_progress(&release.namespace, &release.name, false);
        Ok(())
    }

    async fn upgrade(&self, release: &ChartRelease) -> Result<(), Error> {
        let mut state = self.state.lock();
        let key = (release.namespace.clone(), release.name.clone());
        state
            .log
            .push(format!("upgrade {}/{}", release.namespace, release.name));
        let Some(stored) = state.releases.get_mut(&key) else {
            return Err(Error::not_found(release.resource()));
        };
        stored.version = release.version.clone();
        stored.generation += 1;
        state.emit_release_progress(&release.namespace, &release.name, true);
        Ok(())
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.log.push(format!("uninstall {namespace}/{name}"));
        let Some(stored) = state
            .releases
            .remove(&(namespace.to_string(), name.to_string()))
        else {
            return Err(Error::not_found(format!("HelmRelease {namespace}/{name}")));
        };
        let last = release_object(namespace, name, &stored, None);
        state.emit(HELM_RELEASE_KIND, Some(namespace), name, WatchEvent::Deleted(last));
        Ok(())
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.log.push(format!("ensure-namespace {namespace}"));
        if state.namespaces.insert(namespace.to_string()) {
            state.emit("Namespace", None, namespace, WatchEvent::Added(namespace_object(namespace)));
        }
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.log.push(format!("delete-namespace {namespace}"));
        if !state.namespaces.remove(namespace) {
            return Err(Error::not_found(format!("Namespace {namespace}")));
        }
        state.emit("Namespace", None, namespace, WatchEvent::Deleted(namespace_object(namespace)));
        Ok(())
    }
}

#[async_trait]
impl EventSource for FakeCluster {
    async fn subscribe(
        &self,
        selector: &ResourceSelector,
        _budget: Duration,
    ) -> Result<EventStream, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        // Replay current state as Added, like a watch from resource version 0
        if selector.kind.kind == "Namespace" {
            if state.namespaces.contains(&selector.name) {
                let _ = tx.send(Ok(WatchEvent::Added(namespace_object(&selector.name))));
            }
        } else if let Some(ns) = selector.namespace.as_deref() {
            if let Some(stored) = state.releases.get(&(ns.to_string(), selector.name.clone())) {
                let _ = tx.send(Ok(WatchEvent::Added(release_object(ns, &selector.name, stored, None))));
            }
        }

        state.watchers.push((selector.clone(), tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
