//! Subscription sources for watch events
//!
//! [`EventSource`] is the seam between the waiting engine and whatever
//! delivers change notifications. Production code watches the Kubernetes
//! API; tests and dry runs feed a [`ChannelEventSource`].

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::api::WatchParams;
use kube::Client;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use chartwatch_common::Error;

use crate::event::{ResourceSelector, WatchEvent};

/// Finite stream of events for one subscription
pub type EventStream = BoxStream<'static, Result<WatchEvent, Error>>;

/// Largest server-side watch timeout the API accepts
pub const MAX_SERVER_WATCH_TIMEOUT_SECS: u32 = 290;

/// Opens subscriptions to change notifications for one resource.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Start delivering events for `selector`.
    ///
    /// The returned stream ends when the source closes it; `budget` is a
    /// hint the source may use to bound its own lifetime.
    async fn subscribe(
        &self,
        selector: &ResourceSelector,
        budget: Duration,
    ) -> Result<EventStream, Error>;
}

/// Server-side timeout for a watch with the given client budget.
///
/// One second above the budget so the client-side deadline fires first and
/// a budget expiry is reported as a timeout, not as a closed stream.
pub fn server_timeout_secs(budget: Duration) -> u32 {
    let secs = budget.as_secs().saturating_add(1);
    u32::try_from(secs)
        .unwrap_or(u32::MAX)
        .min(MAX_SERVER_WATCH_TIMEOUT_SECS)
}

/// Watches a single named object through the Kubernetes API.
///
/// Uses resource version "0" so the object's current state is replayed as
/// an `Added` event before live changes.
#[derive(Clone)]
pub struct KubeEventSource {
    client: Client,
}

impl KubeEventSource {
    /// Create a source backed by `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSource for KubeEventSource {
    async fn subscribe(
        &self,
        selector: &ResourceSelector,
        budget: Duration,
    ) -> Result<EventStream, Error> {
        let api = selector
            .kind
            .dynamic_api(&self.client, selector.namespace.as_deref());
        let params = WatchParams::default()
            .fields(&selector.field_selector())
            .timeout(server_timeout_secs(budget));
        let resource = selector.to_string();

        debug!(resource = %resource, timeout_secs = ?params.timeout, "Opening watch");

        let stream = api
            .watch(&params, "0")
            .await
            .map_err(|e| Error::from_kube(e, resource.clone()))?;

        Ok(stream
            .map(move |item| {
                item.map(WatchEvent::from)
                    .map_err(|e| Error::from_kube(e, resource.clone()))
            })
            .boxed())
    }
}

/// In-memory source fed through channels.
///
/// Each call to [`ChannelEventSource::push_subscription`] queues one future
/// subscription and returns the sender that feeds it. Subscriptions are
/// handed out in the order they were pushed. Dropping the sender closes the
/// stream.
#[derive(Default)]
pub struct ChannelEventSource {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<WatchEvent, Error>>>>,
    opened: Mutex<Vec<ResourceSelector>>,
}

impl ChannelEventSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a subscription and return its feeding end
    pub fn push_subscription(&self) -> mpsc::UnboundedSender<Result<WatchEvent, Error>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().push_back(rx);
        tx
    }

    /// Queue a subscription that replays `events` and then closes
    pub fn push_events(&self, events: impl IntoIterator<Item = WatchEvent>) {
        let tx = self.push_subscription();
        for event in events {
            // Receiver is held in the queue, so send cannot fail here
            let _ = tx.send(Ok(event));
        }
    }

    /// Selectors subscribed so far, in order
    pub fn opened(&self) -> Vec<ResourceSelector> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn subscribe(
        &self,
        selector: &ResourceSelector,
        _budget: Duration,
    ) -> Result<EventStream, Error> {
        self.opened.lock().push(selector.clone());
        let rx = self.pending.lock().pop_front().ok_or_else(|| {
            Error::transport(selector.to_string(), "no subscription queued")
        })?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
