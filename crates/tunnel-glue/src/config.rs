//! Glue layer configuration

use serde::{Deserialize, Serialize};
use tunnel_proto::{Qos, Retain};

/// Delivery settings used on the outer session
///
/// Defaults are the weakest settings: at-most-once, not retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlueConfig {
    /// QoS requested for the tunnel subscription
    pub subscribe_qos: Qos,
    /// QoS of every tunneled publish
    pub publish_qos: Qos,
    /// Retain flag of every tunneled publish
    pub publish_retain: Retain,
}

impl GlueConfig {
    pub fn with_subscribe_qos(mut self, qos: Qos) -> Self {
        self.subscribe_qos = qos;
        self
    }

    pub fn with_publish_qos(mut self, qos: Qos) -> Self {
        self.publish_qos = qos;
        self
    }

    pub fn with_publish_retain(mut self, retain: Retain) -> Self {
        self.publish_retain = retain;
        self
    }
}
