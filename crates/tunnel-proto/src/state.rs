//! Layer state codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status threaded through every layer call.
///
/// A layer reads the incoming state and rewrites it to express the outcome of
/// its own work to the neighboring layers. Only `Ok` and `Written` are success
/// values; everything else is a failure that must be handed on, never dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerState {
    /// Operation accepted / completed
    #[default]
    Ok,
    /// Outbound data has been confirmed by the layer below
    Written,
    /// Layer could not be initialized (e.g. no connection data)
    FailedInitialization,
    /// Layer was driven out of order (e.g. push before init)
    InternalError,
    /// Outer session refused the tunnel subscription
    SubscriptionFailed,
    /// Outer session failed to deliver a publish
    PublishFailed,
    /// Outer session is not connected
    NotConnected,
    /// Layer chain is closed
    Closed,
}

impl LayerState {
    /// True for `Ok` and `Written`.
    pub fn is_success(&self) -> bool {
        matches!(self, LayerState::Ok | LayerState::Written)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerState::Ok => "ok",
            LayerState::Written => "written",
            LayerState::FailedInitialization => "failed initialization",
            LayerState::InternalError => "internal error",
            LayerState::SubscriptionFailed => "subscription failed",
            LayerState::PublishFailed => "publish failed",
            LayerState::NotConnected => "not connected",
            LayerState::Closed => "closed",
        };
        f.write_str(name)
    }
}
