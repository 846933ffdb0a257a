//! Tunnel Protocol Definitions
//!
//! This crate defines the vocabulary shared by the gateway crates: the layer
//! state codes threaded through every pipeline call, the pub/sub delivery
//! flags, connection data and the opaque tunnel message, plus the derivation
//! of the per-peer tunnel topic.

pub mod messages;
pub mod state;
pub mod topic;

pub use messages::*;
pub use state::LayerState;
pub use topic::{tunnel_topic, TUNNEL_TOPIC_PREFIX};
