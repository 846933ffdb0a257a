//! Connection data, delivery flags and the tunnel message

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Delivery guarantee requested from the outer pub/sub session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Qos {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Qos {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Qos {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(other),
        }
    }
}

/// Whether the outer session should retain a published message
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retain {
    #[default]
    No,
    Yes,
}

impl From<bool> for Retain {
    fn from(retain: bool) -> Self {
        if retain {
            Retain::Yes
        } else {
            Retain::No
        }
    }
}

/// Connection data handed to the layer chain at init time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    /// Identity of the peer at the far end of the tunnel (device id / username)
    pub username: String,
}

impl ConnectionData {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Opaque inner-protocol bytes carried through the tunnel.
///
/// The gateway never looks inside; framing belongs to the layer above.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelMessage {
    pub payload: Bytes,
}

impl TunnelMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Copy a delivered buffer into an owned message
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(data),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl From<Bytes> for TunnelMessage {
    fn from(payload: Bytes) -> Self {
        Self { payload }
    }
}

impl From<&'static str> for TunnelMessage {
    fn from(payload: &'static str) -> Self {
        Self {
            payload: Bytes::from_static(payload.as_bytes()),
        }
    }
}
