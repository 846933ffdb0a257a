//! In-process pub/sub broker
//!
//! Routes publishes to subscribers by exact topic match. Acknowledgements are
//! delivered synchronously, before `subscribe`/`publish` return, and a session
//! never receives its own publishes.

use crate::{
    PublishHandler, PublishOutcome, SubscriptionEvent, SubscriptionHandler, TransportError,
    TransportResult, TransportSession,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};
use tunnel_proto::{LayerState, Qos, Retain, TunnelMessage};

type SharedHandler = Arc<Mutex<SubscriptionHandler>>;

struct Subscription {
    session_id: u64,
    topic: String,
    handler: SharedHandler,
}

#[derive(Default)]
struct BrokerInner {
    subscriptions: Mutex<Vec<Subscription>>,
    next_session_id: AtomicU64,
    published: AtomicU64,
    reject_subscriptions: AtomicBool,
    reject_publishes: AtomicBool,
    disconnected: AtomicBool,
}

impl BrokerInner {
    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared broker state; clones refer to the same broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session attached to this broker
    pub fn session(&self) -> MemorySession {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Opened memory session {}", id);
        MemorySession {
            id,
            broker: self.clone(),
        }
    }

    /// Refuse every following subscription with `SubscriptionFailed`
    pub fn reject_subscriptions(&self, reject: bool) {
        self.inner
            .reject_subscriptions
            .store(reject, Ordering::SeqCst);
    }

    /// Fail every following publish with `PublishFailed`
    pub fn reject_publishes(&self, reject: bool) {
        self.inner.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// Simulate loss of the outer connection; requests are refused up front
    pub fn set_connected(&self, connected: bool) {
        self.inner.disconnected.store(!connected, Ordering::SeqCst);
    }

    /// Number of publishes accepted so far
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscriptions()
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    fn is_connected(&self) -> bool {
        !self.inner.disconnected.load(Ordering::SeqCst)
    }
}

/// One client session on a [`MemoryBroker`]
#[derive(Clone)]
pub struct MemorySession {
    id: u64,
    broker: MemoryBroker,
}

impl MemorySession {
    pub fn session_id(&self) -> u64 {
        self.id
    }

    /// Drop this session's subscription on `topic`, if any
    pub fn unsubscribe(&self, topic: &str) {
        self.broker
            .inner
            .subscriptions()
            .retain(|s| !(s.session_id == self.id && s.topic == topic));
    }

    /// Drop every subscription held by this session
    pub fn unsubscribe_all(&self) {
        self.broker
            .inner
            .subscriptions()
            .retain(|s| s.session_id != self.id);
    }
}

impl TransportSession for MemorySession {
    fn subscribe(
        &self,
        topic: &str,
        qos: Qos,
        mut handler: SubscriptionHandler,
    ) -> TransportResult<()> {
        if !self.broker.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if topic.is_empty() {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }

        if self.broker.inner.reject_subscriptions.load(Ordering::SeqCst) {
            debug!("Session {} subscription to {} rejected", self.id, topic);
            handler(SubscriptionEvent::Failed(LayerState::SubscriptionFailed));
            return Ok(());
        }

        let handler = Arc::new(Mutex::new(handler));
        {
            let mut subscriptions = self.broker.inner.subscriptions();
            subscriptions.retain(|s| !(s.session_id == self.id && s.topic == topic));
            subscriptions.push(Subscription {
                session_id: self.id,
                topic: topic.to_string(),
                handler: handler.clone(),
            });
        }

        debug!("Session {} subscribed to {} ({:?})", self.id, topic, qos);
        let mut handler = handler.lock().unwrap_or_else(|p| p.into_inner());
        (*handler)(SubscriptionEvent::Granted(qos));
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        message: TunnelMessage,
        qos: Qos,
        retain: Retain,
        handler: PublishHandler,
    ) -> TransportResult<()> {
        if !self.broker.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if topic.is_empty() {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }

        if self.broker.inner.reject_publishes.load(Ordering::SeqCst) {
            debug!("Session {} publish to {} rejected", self.id, topic);
            handler(PublishOutcome::Failed(LayerState::PublishFailed));
            return Ok(());
        }

        trace!(
            "Session {} publishing {} bytes to {} ({:?}, {:?})",
            self.id,
            message.len(),
            topic,
            qos,
            retain
        );
        self.broker.inner.published.fetch_add(1, Ordering::SeqCst);

        // Collect targets first so handlers run without the broker lock held
        let targets: Vec<SharedHandler> = self
            .broker
            .inner
            .subscriptions()
            .iter()
            .filter(|s| s.topic == topic && s.session_id != self.id)
            .map(|s| s.handler.clone())
            .collect();

        for target in targets {
            let mut target = target.lock().unwrap_or_else(|p| p.into_inner());
            (*target)(SubscriptionEvent::Message {
                topic: topic.to_string(),
                payload: message.payload.clone(),
            });
        }

        handler(PublishOutcome::Delivered);
        Ok(())
    }
}
