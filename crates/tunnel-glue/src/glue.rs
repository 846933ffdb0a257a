//! Glue layer: carries an inner session over the outer pub/sub session
//!
//! Outbound messages are published on the peer's tunnel topic, inbound
//! deliveries on the same topic are pulled toward the application. Both
//! outer-session acknowledgements come back as [`GlueEvent`]s posted to the
//! task that owns the layer, so the layer itself is never touched from a
//! transport thread.
//!
//! ```text
//! init ──subscribe──► SubscribePending ──Granted──► Active ──close──► Closed
//!                            │                        │
//!                            └──Failed──► Uninitialized (connect(failure))
//! ```

use crate::config::GlueConfig;
use crate::layer::{Layer, LayerLink};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};
use tunnel_proto::{tunnel_topic, ConnectionData, LayerState, TunnelMessage};
use tunnel_transport::{
    PublishHandler, PublishOutcome, SubscriptionEvent, SubscriptionHandler, TransportSession,
};

/// Glue layer errors
#[derive(Debug, Error)]
pub enum GlueError {
    #[error("Layer failed: {0}")]
    Layer(LayerState),

    #[error("Glue task is not running")]
    TaskClosed,
}

/// Lifecycle phase of a glue layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPhase {
    Uninitialized,
    SubscribePending,
    Active,
    Closed,
}

/// Traffic counters for one tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlueStats {
    pub messages_published: u64,
    pub bytes_published: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub publish_failures: u64,
}

/// Outer-session callback, tagged with the init attempt it belongs to
#[derive(Debug)]
pub enum GlueEvent {
    Subscription {
        generation: u64,
        event: SubscriptionEvent,
    },
    Publish {
        generation: u64,
        outcome: PublishOutcome,
    },
}

/// Receiving side of the layer's callback channel
pub type GlueEvents = mpsc::UnboundedReceiver<GlueEvent>;

/// Private state, alive between init and close
#[derive(Debug, Default)]
struct GlueLayerData {
    tunnel_topic: Option<String>,
    stats: GlueStats,
}

pub struct GlueLayer<L> {
    session: Arc<dyn TransportSession>,
    link: L,
    config: GlueConfig,
    events: mpsc::UnboundedSender<GlueEvent>,
    data: Option<GlueLayerData>,
    phase: LayerPhase,
    generation: u64,
}

impl<L: LayerLink> GlueLayer<L> {
    /// Create a layer over `session`.
    ///
    /// The returned receiver must be drained on the task that owns the layer,
    /// feeding each event to [`GlueLayer::handle_event`].
    pub fn new(
        session: Arc<dyn TransportSession>,
        link: L,
        config: GlueConfig,
    ) -> (Self, GlueEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let layer = Self {
            session,
            link,
            config,
            events,
            data: None,
            phase: LayerPhase::Uninitialized,
            generation: 0,
        };
        (layer, rx)
    }

    pub fn phase(&self) -> LayerPhase {
        self.phase
    }

    pub fn tunnel_topic(&self) -> Option<&str> {
        self.data.as_ref()?.tunnel_topic.as_deref()
    }

    pub fn stats(&self) -> GlueStats {
        self.data.as_ref().map(|d| d.stats).unwrap_or_default()
    }

    pub fn config(&self) -> &GlueConfig {
        &self.config
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Apply one outer-session callback.
    ///
    /// Returns `None` when the event was discarded because it belongs to a
    /// previous init attempt or arrived after teardown.
    pub fn handle_event(&mut self, event: GlueEvent) -> Option<LayerState> {
        match event {
            GlueEvent::Subscription { generation, event } => {
                self.on_subscription(generation, event)
            }
            GlueEvent::Publish {
                generation,
                outcome,
            } => self.on_publish_result(generation, outcome),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.data.is_some() && generation == self.generation
    }

    fn on_subscription(&mut self, generation: u64, event: SubscriptionEvent) -> Option<LayerState> {
        if !self.is_current(generation) {
            warn!(
                "Dropping late subscription event from attempt {} (current {}, {:?})",
                generation, self.generation, self.phase
            );
            return None;
        }

        match event {
            SubscriptionEvent::Granted(qos) => {
                if self.phase != LayerPhase::SubscribePending {
                    warn!("Unexpected subscription ack in phase {:?}", self.phase);
                    return None;
                }
                debug!("Tunnel subscription granted ({:?}), connecting", qos);
                self.phase = LayerPhase::Active;
                Some(self.connect(LayerState::Ok))
            }
            SubscriptionEvent::Failed(state) => {
                if self.phase != LayerPhase::SubscribePending {
                    warn!("Unexpected subscription failure in phase {:?}", self.phase);
                    return None;
                }
                warn!("Tunnel subscription failed: {}", state);
                self.phase = LayerPhase::Uninitialized;
                if let Some(data) = self.data.as_mut() {
                    data.tunnel_topic = None;
                }
                Some(self.connect(state))
            }
            SubscriptionEvent::Message { topic, payload } => {
                if self.phase != LayerPhase::Active {
                    warn!(
                        "Dropping {} bytes on {} received in phase {:?}",
                        payload.len(),
                        topic,
                        self.phase
                    );
                    return None;
                }
                Some(self.on_tunnel_message(payload))
            }
        }
    }

    fn on_tunnel_message(&mut self, payload: Bytes) -> LayerState {
        trace!("Tunnel delivered {} bytes", payload.len());
        if let Some(data) = self.data.as_mut() {
            data.stats.messages_received += 1;
            data.stats.bytes_received += payload.len() as u64;
        }
        self.pull(Some(TunnelMessage::from(payload)), LayerState::Ok)
    }

    fn on_publish_result(&mut self, generation: u64, outcome: PublishOutcome) -> Option<LayerState> {
        if !self.is_current(generation) {
            warn!(
                "Dropping late publish result from attempt {}: {:?}",
                generation, outcome
            );
            return None;
        }

        if let PublishOutcome::Failed(state) = outcome {
            warn!("Tunnel publish failed: {}", state);
            if let Some(data) = self.data.as_mut() {
                data.stats.publish_failures += 1;
            }
        }
        Some(self.push(None, outcome.layer_state()))
    }

    fn subscription_handler(&self) -> SubscriptionHandler {
        let events = self.events.clone();
        let generation = self.generation;
        Box::new(move |event| {
            if events
                .send(GlueEvent::Subscription { generation, event })
                .is_err()
            {
                trace!("Glue layer gone, subscription event discarded");
            }
        })
    }

    fn publish_handler(&self) -> PublishHandler {
        let events = self.events.clone();
        let generation = self.generation;
        Box::new(move |outcome| {
            if events
                .send(GlueEvent::Publish {
                    generation,
                    outcome,
                })
                .is_err()
            {
                trace!("Glue layer gone, publish result discarded");
            }
        })
    }

    fn publish(&mut self, topic: String, message: TunnelMessage) -> LayerState {
        let len = message.len() as u64;
        let handler = self.publish_handler();

        match self.session.publish(
            &topic,
            message,
            self.config.publish_qos,
            self.config.publish_retain,
            handler,
        ) {
            Ok(()) => {
                trace!("Published {} bytes to {}", len, topic);
                if let Some(data) = self.data.as_mut() {
                    data.stats.messages_published += 1;
                    data.stats.bytes_published += len;
                }
                LayerState::Ok
            }
            Err(e) => {
                warn!("Publish to {} refused: {}", topic, e);
                if let Some(data) = self.data.as_mut() {
                    data.stats.publish_failures += 1;
                }
                e.to_layer_state(LayerState::PublishFailed)
            }
        }
    }
}

impl<L: LayerLink> Layer for GlueLayer<L> {
    fn init(&mut self, data: Option<&ConnectionData>, state: LayerState) -> LayerState {
        trace!("glue init ({})", state);

        let Some(connection) = data else {
            error!("No connection data available");
            self.close_externally(LayerState::FailedInitialization);
            return LayerState::FailedInitialization;
        };

        let topic = tunnel_topic(&connection.username);
        let layer_data = self.data.get_or_insert_with(GlueLayerData::default);
        if let Some(previous) = layer_data.tunnel_topic.replace(topic.clone()) {
            debug!("Replacing tunnel topic {}", previous);
        }

        self.generation += 1;
        self.phase = LayerPhase::SubscribePending;
        let handler = self.subscription_handler();

        // connect continues from the subscription ack
        match self
            .session
            .subscribe(&topic, self.config.subscribe_qos, handler)
        {
            Ok(()) => {
                debug!("Subscribing to tunnel topic {}", topic);
                state
            }
            Err(e) => {
                warn!("Subscription to {} refused: {}", topic, e);
                self.phase = LayerPhase::Uninitialized;
                if let Some(layer_data) = self.data.as_mut() {
                    layer_data.tunnel_topic = None;
                }
                e.to_layer_state(LayerState::SubscriptionFailed)
            }
        }
    }

    fn connect(&mut self, state: LayerState) -> LayerState {
        trace!("glue connect ({})", state);
        self.link.connect_on_next(state)
    }

    fn push(&mut self, message: Option<TunnelMessage>, state: LayerState) -> LayerState {
        trace!("glue push ({})", state);

        let Some(topic) = self.tunnel_topic().map(str::to_owned) else {
            error!("Unable to get the target tunnel topic");
            return LayerState::InternalError;
        };
        if self.phase != LayerPhase::Active {
            error!("Push on {} before the tunnel is active ({:?})", topic, self.phase);
            return LayerState::InternalError;
        }

        match (state, message) {
            (LayerState::Ok, Some(message)) => self.publish(topic, message),
            (LayerState::Ok, None) => state,
            (LayerState::Written, _) => self.link.push_on_next(None, LayerState::Written),
            (failure, _) => self.link.push_on_next(None, failure),
        }
    }

    fn pull(&mut self, message: Option<TunnelMessage>, state: LayerState) -> LayerState {
        trace!("glue pull ({})", state);
        self.link.pull_on_next(message, state)
    }

    fn close(&mut self, state: LayerState) -> LayerState {
        trace!("glue close ({})", state);
        self.close_externally(state)
    }

    fn close_externally(&mut self, state: LayerState) -> LayerState {
        trace!("glue close externally ({})", state);

        if let Some(data) = self.data.take() {
            debug!(
                "Released tunnel {:?} after {} published / {} received",
                data.tunnel_topic, data.stats.messages_published, data.stats.messages_received
            );
        }
        self.phase = LayerPhase::Closed;

        self.link.close_externally_on_next(state)
    }
}
