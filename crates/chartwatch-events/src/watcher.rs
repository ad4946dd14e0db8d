//! Budgeted subscriptions over an [`EventSource`]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use chartwatch_common::Error;

use crate::event::{ResourceSelector, WatchEvent};
use crate::source::{EventSource, EventStream};

/// Result of pulling from a [`Subscription`]
#[derive(Debug)]
pub enum Next {
    /// The next event in delivery order
    Event(WatchEvent),
    /// The source ended the stream before the budget
    Closed,
    /// The budget elapsed before another event arrived
    Expired,
}

/// Opens budgeted subscriptions for single resources.
#[derive(Clone)]
pub struct EventWatcher {
    source: Arc<dyn EventSource>,
}

impl EventWatcher {
    /// Create a watcher over `source`
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self { source }
    }

    /// Subscribe to `selector` for at most `budget`.
    ///
    /// The budget starts before the subscription is opened, so a slow
    /// subscribe counts against it.
    pub async fn open(
        &self,
        selector: &ResourceSelector,
        budget: Duration,
    ) -> Result<Subscription, Error> {
        let started = Instant::now();
        let deadline = started + budget;

        let stream = match timeout_at(deadline, self.source.subscribe(selector, budget)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout {
                    resource: selector.to_string(),
                    budget,
                })
            }
        };

        debug!(resource = %selector, ?budget, "Subscription opened");

        Ok(Subscription {
            selector: selector.clone(),
            stream: Some(stream),
            started,
            deadline,
            delivered: 0,
            terminal: None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Terminal {
    Closed,
    Expired,
}

/// A live, ordered, finite sequence of events for one resource.
///
/// Once closed or expired the underlying stream is released and every
/// further call to [`Subscription::next`] reports the same terminal state.
pub struct Subscription {
    selector: ResourceSelector,
    stream: Option<EventStream>,
    started: Instant,
    deadline: Instant,
    delivered: usize,
    terminal: Option<Terminal>,
}

impl Subscription {
    /// Pull the next event, waiting no later than the deadline.
    ///
    /// Transport failures on the stream release it and are returned as
    /// errors.
    pub async fn next(&mut self) -> Result<Next, Error> {
        if let Some(terminal) = self.terminal {
            return Ok(terminal.into());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Next::Closed);
        };

        match timeout_at(self.deadline, stream.next()).await {
            Ok(Some(Ok(event))) => {
                self.delivered += 1;
                trace!(
                    resource = %self.selector,
                    event_type = %event.event_type(),
                    delivered = self.delivered,
                    "Event delivered"
                );
                Ok(Next::Event(event))
            }
            Ok(Some(Err(e))) => {
                self.stream = None;
                self.terminal = Some(Terminal::Closed);
                Err(e)
            }
            Ok(None) => Ok(self.finish(Terminal::Closed)),
            Err(_) => Ok(self.finish(Terminal::Expired)),
        }
    }

    /// Release the stream early
    pub fn close(&mut self) {
        if self.terminal.is_none() {
            self.finish(Terminal::Closed);
        }
    }

    /// Selector this subscription is scoped to
    pub fn selector(&self) -> &ResourceSelector {
        &self.selector
    }

    /// Number of events delivered so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Time since the subscription was requested
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the stream has been released
    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }

    fn finish(&mut self, terminal: Terminal) -> Next {
        self.stream = None;
        self.terminal = Some(terminal);
        debug!(
            resource = %self.selector,
            delivered = self.delivered,
            ?terminal,
            "Subscription finished"
        );
        terminal.into()
    }
}

impl From<Terminal> for Next {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Closed => Next::Closed,
            Terminal::Expired => Next::Expired,
        }
    }
}
