//! Predicate-driven waiting on a single resource
//!
//! Waiting is split in two so callers can subscribe before they mutate:
//! [`ConditionWaiter::arm`] opens the subscription, the caller submits its
//! change, then [`ArmedWait::run`] consumes events. An event produced by
//! the mutation can therefore never be missed.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use chartwatch_common::Error;

use crate::event::{ResourceSelector, WatchEvent};
use crate::predicates::Predicate;
use crate::watcher::{EventWatcher, Next, Subscription};

/// What to wait for
#[derive(Clone)]
pub struct WaitSpec {
    /// Resource the wait is scoped to
    pub selector: ResourceSelector,
    /// Upper bound on the whole wait
    pub budget: Duration,
    /// Evaluated against each event in order
    pub predicate: Predicate,
}

impl WaitSpec {
    /// Build a wait spec
    pub fn new(selector: ResourceSelector, budget: Duration, predicate: Predicate) -> Self {
        Self {
            selector,
            budget,
            predicate,
        }
    }
}

impl fmt::Debug for WaitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitSpec")
            .field("selector", &self.selector)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

/// Successful end of a wait
#[derive(Clone, Debug)]
pub struct WaitOutcome {
    /// The event that satisfied the predicate
    pub event: WatchEvent,
    /// Events consumed, including the satisfying one
    pub events_consumed: usize,
    /// Time spent waiting
    pub elapsed: Duration,
}

/// Blocks until a predicate holds over a resource's event stream.
#[derive(Clone)]
pub struct ConditionWaiter {
    watcher: EventWatcher,
}

impl ConditionWaiter {
    /// Create a waiter over `watcher`
    pub fn new(watcher: EventWatcher) -> Self {
        Self { watcher }
    }

    /// Open the subscription for `spec` without consuming events yet
    pub async fn arm(&self, spec: WaitSpec) -> Result<ArmedWait, Error> {
        let subscription = self.watcher.open(&spec.selector, spec.budget).await?;
        Ok(ArmedWait { spec, subscription })
    }

    /// Subscribe and wait in one step
    pub async fn wait(&self, spec: WaitSpec) -> Result<WaitOutcome, Error> {
        self.arm(spec).await?.run().await
    }
}

/// A wait whose subscription is already open
pub struct ArmedWait {
    spec: WaitSpec,
    subscription: Subscription,
}

impl ArmedWait {
    /// Selector this wait is scoped to
    pub fn selector(&self) -> &ResourceSelector {
        &self.spec.selector
    }

    /// Consume events until the predicate decides or the budget elapses.
    ///
    /// Stops reading at the first satisfying event. Error events abort the
    /// wait, as does a predicate rejection. The subscription is released on
    /// every exit path.
    pub async fn run(mut self) -> Result<WaitOutcome, Error> {
        let resource = self.spec.selector.to_string();
        let result = self.consume(&resource).await;
        self.subscription.close();

        match &result {
            Ok(outcome) => info!(
                resource = %resource,
                events = outcome.events_consumed,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "Condition satisfied"
            ),
            Err(e) => warn!(resource = %resource, error = %e, "Wait failed"),
        }
        result
    }

    async fn consume(&mut self, resource: &str) -> Result<WaitOutcome, Error> {
        loop {
            let event = match self.subscription.next().await? {
                Next::Event(event) => event,
                Next::Closed => {
                    return Err(Error::StreamClosed {
                        resource: resource.to_string(),
                    })
                }
                Next::Expired => {
                    return Err(Error::Timeout {
                        resource: resource.to_string(),
                        budget: self.spec.budget,
                    })
                }
            };

            if let WatchEvent::Error(status) = &event {
                return Err(Error::Watch {
                    resource: resource.to_string(),
                    code: status.code,
                    message: format!("{}: {}", status.reason, status.message),
                });
            }

            debug!(
                resource = %resource,
                event_type = %event.event_type(),
                resource_version = ?event.resource_version(),
                "Evaluating predicate"
            );

            match (self.spec.predicate)(&event) {
                Ok(true) => {
                    return Ok(WaitOutcome {
                        event,
                        events_consumed: self.subscription.delivered(),
                        elapsed: self.subscription.elapsed(),
                    })
                }
                Ok(false) => continue,
                Err(reason) => return Err(Error::predicate(resource, reason)),
            }
        }
    }
}
