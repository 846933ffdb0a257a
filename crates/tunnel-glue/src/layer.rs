//! Layer chain interface
//!
//! A layer exposes the entry points the chain dispatches to ([`Layer`]); the
//! chain hands each layer a [`LayerLink`] through which it reaches its
//! neighbor. Every call takes and returns a [`LayerState`].

use tokio::sync::mpsc;
use tracing::debug;
use tunnel_proto::{ConnectionData, LayerState, TunnelMessage};

/// Entry points of one layer ("process ... on this layer")
pub trait Layer {
    fn init(&mut self, data: Option<&ConnectionData>, state: LayerState) -> LayerState;

    fn connect(&mut self, state: LayerState) -> LayerState;

    fn push(&mut self, message: Option<TunnelMessage>, state: LayerState) -> LayerState;

    fn pull(&mut self, message: Option<TunnelMessage>, state: LayerState) -> LayerState;

    /// Locally requested close
    fn close(&mut self, state: LayerState) -> LayerState;

    /// Close requested by the chain or by a failure
    fn close_externally(&mut self, state: LayerState) -> LayerState;
}

/// Dispatch toward the neighboring layer ("process ... on next layer")
pub trait LayerLink {
    fn connect_on_next(&mut self, state: LayerState) -> LayerState;

    fn push_on_next(&mut self, message: Option<TunnelMessage>, state: LayerState) -> LayerState;

    fn pull_on_next(&mut self, message: Option<TunnelMessage>, state: LayerState) -> LayerState;

    fn close_externally_on_next(&mut self, state: LayerState) -> LayerState;
}

/// What the neighbor of a [`ChannelLink`] observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected(LayerState),
    Pushed {
        message: Option<TunnelMessage>,
        state: LayerState,
    },
    Pulled {
        message: Option<TunnelMessage>,
        state: LayerState,
    },
    Closed(LayerState),
}

/// Link whose neighbor lives on the other end of a channel
///
/// Used when the layer above is an application task rather than another
/// in-process layer.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelLink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: LinkEvent, state: LayerState) -> LayerState {
        if self.tx.send(event).is_err() {
            debug!("Link receiver dropped, event discarded");
        }
        state
    }
}

impl LayerLink for ChannelLink {
    fn connect_on_next(&mut self, state: LayerState) -> LayerState {
        self.forward(LinkEvent::Connected(state), state)
    }

    fn push_on_next(&mut self, message: Option<TunnelMessage>, state: LayerState) -> LayerState {
        self.forward(LinkEvent::Pushed { message, state }, state)
    }

    fn pull_on_next(&mut self, message: Option<TunnelMessage>, state: LayerState) -> LayerState {
        self.forward(LinkEvent::Pulled { message, state }, state)
    }

    fn close_externally_on_next(&mut self, state: LayerState) -> LayerState {
        self.forward(LinkEvent::Closed(state), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_link_forwards_in_order() {
        let (mut link, mut rx) = ChannelLink::new();

        assert_eq!(link.connect_on_next(LayerState::Ok), LayerState::Ok);
        link.pull_on_next(Some(TunnelMessage::from("XYZ")), LayerState::Ok);
        link.push_on_next(None, LayerState::Written);
        link.close_externally_on_next(LayerState::Ok);

        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Connected(LayerState::Ok));
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::Pulled {
                message: Some(TunnelMessage::from("XYZ")),
                state: LayerState::Ok
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::Pushed {
                message: None,
                state: LayerState::Written
            }
        );
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Closed(LayerState::Ok));
    }

    #[test]
    fn test_channel_link_survives_dropped_receiver() {
        let (mut link, rx) = ChannelLink::new();
        drop(rx);

        assert_eq!(
            link.push_on_next(None, LayerState::PublishFailed),
            LayerState::PublishFailed
        );
    }
}
