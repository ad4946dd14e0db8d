//! Event-stream waiting for chartwatch
//!
//! A [`ConditionWaiter`] drives one [`Subscription`] from an
//! [`EventWatcher`] and evaluates a [`Predicate`] against each
//! [`WatchEvent`] in delivery order until the predicate is satisfied,
//! rejects the resource, or the budget runs out.

#![warn(missing_docs)]

pub mod event;
pub mod predicates;
pub mod source;
pub mod waiter;
pub mod watcher;

pub use event::{ErrorStatus, EventType, ResourceSelector, WatchEvent};
pub use predicates::{Predicate, PredicateResult};
pub use source::{
    ChannelEventSource, EventSource, EventStream, KubeEventSource, MAX_SERVER_WATCH_TIMEOUT_SECS,
};
pub use waiter::{ArmedWait, ConditionWaiter, WaitOutcome, WaitSpec};
pub use watcher::{EventWatcher, Next, Subscription};

use std::time::Duration;

/// Default budget for a single wait, kept under the API server's watch limit
pub const DEFAULT_WATCH_BUDGET: Duration = Duration::from_secs(280);

/// Largest budget whose server-side timeout (budget plus one second) is not
/// clamped. A longer budget would see the server end the watch early.
pub const MAX_WATCH_BUDGET: Duration =
    Duration::from_secs(MAX_SERVER_WATCH_TIMEOUT_SECS as u64 - 1);
