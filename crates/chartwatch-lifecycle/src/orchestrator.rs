//! Install, upgrade, and uninstall of chart releases
//!
//! Every operation follows the same shape: claim the transition, subscribe
//! to the release, submit the mutation, then wait on the subscription for
//! the operation's readiness predicate. Subscribing first means the event
//! the mutation produces cannot slip past the waiter.
//!
//! Install registers its inverse on the caller's [`Session`] *before*
//! anything is submitted, so a half-finished install is still torn down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use chartwatch_common::Error;
use chartwatch_events::predicates::{self, Predicate};
use chartwatch_events::{
    ArmedWait, ConditionWaiter, EventSource, EventWatcher, ResourceSelector, WaitOutcome,
    WaitSpec, DEFAULT_WATCH_BUDGET,
};
use chartwatch_session::Session;

use crate::client::ChartClient;
use crate::release::ChartRelease;
use crate::state::{LifecycleState, Transition};

/// Budgets applied to orchestrator waits
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Budget for readiness after install or upgrade
    pub watch_budget: Duration,
    /// Budget for each deletion wait during uninstall and cleanup
    pub delete_budget: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            watch_budget: DEFAULT_WATCH_BUDGET,
            delete_budget: DEFAULT_WATCH_BUDGET,
        }
    }
}

/// One lifecycle step for one resource: what to wait for going forward,
/// and what to wait for when undoing it.
#[derive(Clone)]
pub struct LifecycleOperation {
    /// Resource the operation targets
    pub selector: ResourceSelector,
    /// Kind of transition
    pub transition: Transition,
    /// Satisfied when the forward mutation has taken effect
    pub forward: Predicate,
    /// Satisfied when the inverse has taken effect, if there is one
    pub inverse: Option<Predicate>,
}

impl LifecycleOperation {
    /// Install: ready, undone by deletion
    pub fn install(release: &ChartRelease) -> Self {
        Self {
            selector: release.selector(),
            transition: Transition::Install,
            forward: predicates::ready_condition(),
            inverse: Some(predicates::deleted()),
        }
    }

    /// Upgrade: ready at the requested chart version
    pub fn upgrade(release: &ChartRelease) -> Self {
        Self {
            selector: release.selector(),
            transition: Transition::Upgrade,
            forward: predicates::ready_at_version(&release.version),
            inverse: None,
        }
    }

    /// Uninstall: deleted
    pub fn uninstall(release: &ChartRelease) -> Self {
        Self {
            selector: release.selector(),
            transition: Transition::Uninstall,
            forward: predicates::deleted(),
            inverse: None,
        }
    }

    /// The uninstall that undoes this operation, if it has an inverse
    pub fn undo(&self) -> Option<LifecycleOperation> {
        self.inverse.clone().map(|inverse| LifecycleOperation {
            selector: self.selector.clone(),
            transition: Transition::Uninstall,
            forward: inverse,
            inverse: None,
        })
    }
}

/// Drives releases through their lifecycle states.
///
/// Cheap to clone; clones share the state table, which lets cleanup
/// actions registered on a session update it when they run.
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    client: Arc<dyn ChartClient>,
    waiter: ConditionWaiter,
    config: OrchestratorConfig,
    states: Arc<Mutex<HashMap<String, LifecycleState>>>,
    // Namespaces with a pending delete registered by this orchestrator
    namespaces: Arc<Mutex<HashSet<String>>>,
}

impl LifecycleOrchestrator {
    /// Create an orchestrator submitting through `client` and watching
    /// through `source`
    pub fn new(
        client: Arc<dyn ChartClient>,
        source: Arc<dyn EventSource>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            waiter: ConditionWaiter::new(EventWatcher::new(source)),
            config,
            states: Arc::new(Mutex::new(HashMap::new())),
            namespaces: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Current state of `release`
    pub fn state(&self, release: &ChartRelease) -> LifecycleState {
        self.states
            .lock()
            .get(&release.resource())
            .copied()
            .unwrap_or_default()
    }

    /// Install `release` and wait until it reports ready.
    ///
    /// The uninstall (and namespace removal, when the release creates its
    /// namespace) is registered on `session` before any mutation.
    pub async fn install(
        &self,
        session: &Session,
        release: &ChartRelease,
    ) -> Result<WaitOutcome, Error> {
        release.validate()?;
        let op = LifecycleOperation::install(release);
        self.begin(release, op.transition)?;

        self.register_inverse(session, release, &op);

        let result = self.submit_install(release, &op).await;
        self.finish(release, op.transition, result)
    }

    /// Take ownership of a release installed outside this orchestrator.
    ///
    /// The release is treated as ready and its teardown is registered on
    /// `session` exactly as an install would register it. Nothing is
    /// submitted; a release that turns out to be missing is handled by the
    /// not-found rules of upgrade and uninstall.
    pub fn adopt(&self, session: &Session, release: &ChartRelease) -> Result<(), Error> {
        release.validate()?;
        let key = release.resource();
        {
            let mut states = self.states.lock();
            let current = states.get(&key).copied().unwrap_or_default();
            if current != LifecycleState::Absent {
                return Err(Error::InvalidTransition {
                    resource: key,
                    operation: "adopt".to_string(),
                    state: current.to_string(),
                });
            }
            states.insert(key, LifecycleState::Ready);
        }
        info!(release = %release.name, namespace = %release.namespace, "Adopted release");
        self.register_inverse(session, release, &LifecycleOperation::install(release));
        Ok(())
    }

    /// Register the teardown of `release` on `session`.
    ///
    /// Only the first release to claim a namespace registers its delete.
    /// That action sits below every later uninstall on the stack, so a
    /// shared namespace goes once, after all of its releases.
    fn register_inverse(&self, session: &Session, release: &ChartRelease, op: &LifecycleOperation) {
        if release.create_namespace && self.namespaces.lock().insert(release.namespace.clone()) {
            let this = self.clone();
            let selector = release.namespace_selector();
            session.register(format!("delete namespace {}", release.namespace), move || async move {
                this.remove_namespace(&selector).await
            });
        }
        if let Some(undo) = op.undo() {
            let this = self.clone();
            let owned = release.clone();
            session.register(format!("uninstall {}", release.resource()), move || async move {
                this.remove_release(&owned, &undo).await
            });
        }
    }

    /// Install `releases` in order, each only after its prerequisites are ready.
    ///
    /// Every name in a release's `depends_on` must belong to a release
    /// earlier in the list. The first failure stops the chain; later
    /// releases are never submitted.
    pub async fn install_all(
        &self,
        session: &Session,
        releases: &[ChartRelease],
    ) -> Result<Vec<WaitOutcome>, Error> {
        validate_order(releases)?;

        let mut outcomes = Vec::with_capacity(releases.len());
        for release in releases {
            match self.install(session, release).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    let skipped: Vec<&str> = releases
                        .iter()
                        .skip(outcomes.len() + 1)
                        .map(|r| r.name.as_str())
                        .collect();
                    if !skipped.is_empty() {
                        warn!(release = %release.name, ?skipped, "Install failed, skipping remaining releases");
                    }
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    /// Move a ready release to `release.version` and wait until the
    /// controller reports it ready at that version.
    pub async fn upgrade(&self, release: &ChartRelease) -> Result<WaitOutcome, Error> {
        release.validate()?;
        let op = LifecycleOperation::upgrade(release);
        self.begin(release, op.transition)?;

        let result = async {
            let armed = self.arm(&op, self.config.watch_budget).await?;
            self.client.upgrade(release).await?;
            armed.run().await
        }
        .await;
        self.finish(release, op.transition, result)
    }

    /// Remove a ready or failed release and wait for its deletion.
    ///
    /// A release that is already gone counts as removed.
    pub async fn uninstall(&self, release: &ChartRelease) -> Result<(), Error> {
        let op = LifecycleOperation::uninstall(release);
        self.begin(release, op.transition)?;
        let result = self.submit_uninstall(release, &op).await;
        self.finish(release, op.transition, result)
    }

    async fn submit_install(
        &self,
        release: &ChartRelease,
        op: &LifecycleOperation,
    ) -> Result<WaitOutcome, Error> {
        if release.create_namespace {
            self.client.ensure_namespace(&release.namespace).await?;
        }
        let armed = self.arm(op, self.config.watch_budget).await?;
        info!(release = %release.name, namespace = %release.namespace, version = %release.version, "Installing release");
        self.client.install(release).await?;
        armed.run().await
    }

    async fn submit_uninstall(
        &self,
        release: &ChartRelease,
        op: &LifecycleOperation,
    ) -> Result<(), Error> {
        let armed = self.arm(op, self.config.delete_budget).await?;
        info!(release = %release.name, namespace = %release.namespace, "Uninstalling release");
        match self.client.uninstall(&release.name, &release.namespace).await {
            Ok(()) => armed.run().await.map(|_| ()),
            Err(e) if e.is_not_found() => {
                debug!(release = %release.name, "Release already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn arm(
        &self,
        op: &LifecycleOperation,
        budget: Duration,
    ) -> Result<ArmedWait, Error> {
        self.waiter
            .arm(WaitSpec::new(op.selector.clone(), budget, op.forward.clone()))
            .await
    }

    /// Cleanup path for an installed release; a no-op once it is absent
    async fn remove_release(
        &self,
        release: &ChartRelease,
        undo: &LifecycleOperation,
    ) -> Result<(), Error> {
        let key = release.resource();
        {
            let mut states = self.states.lock();
            let current = states.get(&key).copied().unwrap_or_default();
            if current == LifecycleState::Absent {
                debug!(release = %release.name, "Release already absent, nothing to clean up");
                return Ok(());
            }
            states.insert(key, LifecycleState::Uninstalling);
        }
        let result = self.submit_uninstall(release, undo).await;
        self.finish(release, undo.transition, result)
    }

    /// Delete a namespace and wait for it to disappear; absent is success
    async fn remove_namespace(&self, selector: &ResourceSelector) -> Result<(), Error> {
        let namespace = selector.name.as_str();
        self.namespaces.lock().remove(namespace);
        let armed = self
            .waiter
            .arm(WaitSpec::new(
                selector.clone(),
                self.config.delete_budget,
                predicates::deleted(),
            ))
            .await?;
        match self.client.delete_namespace(namespace).await {
            Ok(()) => {
                armed.run().await?;
                info!(namespace = %namespace, "Namespace deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %namespace, "Namespace already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Claim a transition, rejecting it when the current state forbids it
    fn begin(&self, release: &ChartRelease, transition: Transition) -> Result<(), Error> {
        let key = release.resource();
        let mut states = self.states.lock();
        let current = states.get(&key).copied().unwrap_or_default();
        if !transition.allowed_from(current) {
            return Err(Error::InvalidTransition {
                resource: key,
                operation: transition.to_string(),
                state: current.to_string(),
            });
        }
        let next = transition.in_flight();
        debug!(release = %release.name, from = %current, to = %next, "Transition started");
        states.insert(key, next);
        Ok(())
    }

    /// Record the end of a transition
    fn finish<T>(
        &self,
        release: &ChartRelease,
        transition: Transition,
        result: Result<T, Error>,
    ) -> Result<T, Error> {
        let next = match &result {
            Ok(_) => transition.target(),
            Err(e) => {
                warn!(release = %release.name, operation = %transition, error = %e, "Operation failed");
                LifecycleState::Failed
            }
        };
        self.states.lock().insert(release.resource(), next);
        info!(release = %release.name, operation = %transition, state = %next, "Transition finished");
        result
    }
}

/// Reject release lists whose dependencies are unknown or come later
pub fn validate_order(releases: &[ChartRelease]) -> Result<(), Error> {
    let mut seen: Vec<&str> = Vec::with_capacity(releases.len());
    for release in releases {
        if seen.contains(&release.name.as_str()) {
            return Err(Error::invalid_spec(
                release.resource(),
                format!("release name {} appears more than once", release.name),
            ));
        }
        for dep in &release.depends_on {
            if !seen.contains(&dep.as_str()) {
                let why = if releases.iter().any(|r| &r.name == dep) {
                    "is listed after it"
                } else {
                    "is not in the release list"
                };
                return Err(Error::invalid_spec(
                    release.resource(),
                    format!("dependency {dep} {why}"),
                ));
            }
        }
        seen.push(&release.name);
    }
    Ok(())
}
