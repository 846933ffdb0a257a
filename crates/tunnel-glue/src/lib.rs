//! Gateway glue layer
//!
//! Tunnels an inner byte-stream session to a remote peer over an already
//! connected publish/subscribe session. The layer sits at the bottom of the
//! inner session's layer chain, where an I/O layer would normally be:
//!
//! ```text
//!   inner session layers (framing, protocol)
//!            │ push ▼            ▲ pull
//!   ┌──────────────────────────────────────┐
//!   │ GlueLayer      topic "$Tunnel/<peer>" │
//!   └──────────────────────────────────────┘
//!            │ publish ▼         ▲ subscription delivery
//!   outer pub/sub session (TransportSession)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tunnel_glue::{ChannelLink, GlueConfig, GlueTask};
//! use tunnel_proto::ConnectionData;
//! use tunnel_transport::MemoryBroker;
//!
//! let broker = MemoryBroker::new();
//! let (link, mut link_events) = ChannelLink::new();
//! let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
//! task.spawn();
//!
//! handle.init(ConnectionData::new("device-42")).await?;
//! // LinkEvent::Connected arrives once the tunnel subscription is granted
//! handle.push("hello").await?;
//! ```

pub mod config;
pub mod glue;
pub mod layer;
pub mod task;

pub use config::GlueConfig;
pub use glue::{GlueError, GlueEvent, GlueEvents, GlueLayer, GlueStats, LayerPhase};
pub use layer::{ChannelLink, Layer, LayerLink, LinkEvent};
pub use task::{GlueCommand, GlueHandle, GlueTask};
