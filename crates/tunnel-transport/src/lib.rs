//! Transport abstraction for the outer pub/sub session
//!
//! The gateway does not own the outer session. It only needs two
//! fire-and-confirm-later primitives from it, `subscribe` and `publish`, whose
//! outcomes are reported through the handler registered with each request.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 tunnel-glue (GlueLayer)                  │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Uses TransportSession
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │            tunnel-transport (this crate)                 │
//! │  - TransportSession     - SubscriptionEvent              │
//! │  - PublishOutcome       - MemoryBroker (in-process)      │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Implemented by
//!                           ↓
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ MemoryBroker / MemorySession │ MQTT client sessions      │
//! └──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Handlers may be invoked from any thread. Implementations must call a
//! subscription handler once with `Granted` or `Failed`, and afterwards once
//! per delivered message; a publish handler is called exactly once.

pub mod memory;

use bytes::Bytes;
use thiserror::Error;
use tunnel_proto::{LayerState, Qos, Retain, TunnelMessage};

pub use memory::{MemoryBroker, MemorySession};

/// Transport-level errors
///
/// Returned when a request is refused before it was ever submitted; failures
/// that happen after submission are reported through the request's handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Session not connected")]
    NotConnected,

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Express this refusal in layer vocabulary.
    ///
    /// Connection loss maps to `NotConnected`; anything else is reported as
    /// the failure of the operation that was attempted.
    pub fn to_layer_state(&self, failed_operation: LayerState) -> LayerState {
        match self {
            TransportError::NotConnected | TransportError::SessionClosed => {
                LayerState::NotConnected
            }
            TransportError::InvalidTopic(_) | TransportError::Rejected(_) => failed_operation,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Everything a subscription handler can be told.
///
/// One handler serves both the one-shot acknowledgement and every message
/// delivered on the subscription afterwards, so each case is a distinct
/// variant rather than a status code to be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// Subscription acknowledged with the granted QoS
    Granted(Qos),
    /// Subscription refused; the state says why
    Failed(LayerState),
    /// A message arrived on the subscribed topic
    Message { topic: String, payload: Bytes },
}

/// Final result of one publish request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    Failed(LayerState),
}

impl PublishOutcome {
    /// State a pipeline continues with after this outcome
    pub fn layer_state(&self) -> LayerState {
        match self {
            PublishOutcome::Delivered => LayerState::Written,
            PublishOutcome::Failed(state) => *state,
        }
    }
}

/// Long-lived subscription callback
pub type SubscriptionHandler = Box<dyn FnMut(SubscriptionEvent) + Send>;

/// One-shot publish callback
pub type PublishHandler = Box<dyn FnOnce(PublishOutcome) + Send>;

/// A connected publish/subscribe session
///
/// Both operations submit a request and return immediately; they never block
/// waiting for the broker.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait TransportSession: Send + Sync {
    /// Subscribe to `topic`, reporting the acknowledgement and every later
    /// delivery through `handler`.
    fn subscribe(&self, topic: &str, qos: Qos, handler: SubscriptionHandler)
        -> TransportResult<()>;

    /// Publish `message` on `topic`, reporting completion through `handler`.
    fn publish(
        &self,
        topic: &str,
        message: TunnelMessage,
        qos: Qos,
        retain: Retain,
        handler: PublishHandler,
    ) -> TransportResult<()>;
}
