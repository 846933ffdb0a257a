//! Single-task driver for a glue layer
//!
//! The layer, its outer-session callbacks and the application's requests
//! all run on one tokio task. Callbacks are applied before queued commands so
//! a `WRITTEN` continuation is never overtaken by the next push.

use crate::config::GlueConfig;
use crate::glue::{GlueError, GlueEvents, GlueLayer, GlueStats};
use crate::layer::{Layer, LayerLink};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tunnel_proto::{ConnectionData, LayerState, TunnelMessage};
use tunnel_transport::TransportSession;

/// Requests accepted by a running [`GlueTask`]
#[derive(Debug)]
pub enum GlueCommand {
    Init {
        data: Option<ConnectionData>,
        reply: oneshot::Sender<LayerState>,
    },
    Push {
        message: TunnelMessage,
        reply: oneshot::Sender<LayerState>,
    },
    Close {
        reply: oneshot::Sender<LayerState>,
    },
}

/// Cloneable handle for sending requests to a [`GlueTask`]
#[derive(Debug, Clone)]
pub struct GlueHandle {
    commands: mpsc::UnboundedSender<GlueCommand>,
}

impl GlueHandle {
    /// Start the tunnel toward `data.username`.
    ///
    /// Resolves once the subscription was submitted; the connect outcome is
    /// reported through the layer link.
    pub async fn init(&self, data: ConnectionData) -> Result<LayerState, GlueError> {
        self.request(|reply| GlueCommand::Init {
            data: Some(data),
            reply,
        })
        .await
    }

    /// Submit one outbound message; completion is reported as a `Written`
    /// push through the layer link.
    pub async fn push(&self, message: impl Into<TunnelMessage>) -> Result<LayerState, GlueError> {
        let message = message.into();
        self.request(|reply| GlueCommand::Push { message, reply })
            .await
    }

    pub async fn close(&self) -> Result<LayerState, GlueError> {
        self.request(|reply| GlueCommand::Close { reply }).await
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<LayerState>) -> GlueCommand,
    ) -> Result<LayerState, GlueError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| GlueError::TaskClosed)?;

        let state = rx.await.map_err(|_| GlueError::TaskClosed)?;
        if state.is_failure() {
            return Err(GlueError::Layer(state));
        }
        Ok(state)
    }
}

/// Owns a [`GlueLayer`] and serializes everything that touches it
pub struct GlueTask<L> {
    layer: GlueLayer<L>,
    events: GlueEvents,
    commands: mpsc::UnboundedReceiver<GlueCommand>,
}

impl<L> GlueTask<L>
where
    L: LayerLink + Send + 'static,
{
    pub fn new(
        session: Arc<dyn TransportSession>,
        link: L,
        config: GlueConfig,
    ) -> (Self, GlueHandle) {
        let (layer, events) = GlueLayer::new(session, link, config);
        let (tx, commands) = mpsc::unbounded_channel();
        let task = Self {
            layer,
            events,
            commands,
        };
        (task, GlueHandle { commands: tx })
    }

    pub fn spawn(self) -> JoinHandle<GlueStats> {
        tokio::spawn(self.run())
    }

    /// Run until closed or until every handle is dropped.
    ///
    /// Returns the traffic counters of the tunnel as they were at teardown.
    pub async fn run(mut self) -> GlueStats {
        debug!("Glue task started");

        loop {
            tokio::select! {
                biased;

                Some(event) = self.events.recv() => {
                    self.layer.handle_event(event);
                }

                command = self.commands.recv() => match command {
                    Some(GlueCommand::Init { data, reply }) => {
                        let state = self.layer.init(data.as_ref(), LayerState::Ok);
                        let _ = reply.send(state);
                    }
                    Some(GlueCommand::Push { message, reply }) => {
                        let state = self.layer.push(Some(message), LayerState::Ok);
                        let _ = reply.send(state);
                    }
                    Some(GlueCommand::Close { reply }) => {
                        let stats = self.layer.stats();
                        let state = self.layer.close(LayerState::Ok);
                        let _ = reply.send(state);
                        info!("Glue task closed");
                        return stats;
                    }
                    None => {
                        debug!("All glue handles dropped, closing");
                        let stats = self.layer.stats();
                        self.layer.close(LayerState::Ok);
                        return stats;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{ChannelLink, LinkEvent};
    use std::time::Duration;
    use tokio::time::timeout;
    use tunnel_transport::MemoryBroker;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("link closed")
    }

    #[tokio::test]
    async fn test_init_then_connect() {
        let broker = MemoryBroker::new();
        let (link, mut link_rx) = ChannelLink::new();
        let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
        let join = task.spawn();

        let state = handle.init(ConnectionData::new("dev1")).await.unwrap();
        assert_eq!(state, LayerState::Ok);
        assert_eq!(next_event(&mut link_rx).await, LinkEvent::Connected(LayerState::Ok));

        handle.close().await.unwrap();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_push_reports_written() {
        let broker = MemoryBroker::new();
        let (link, mut link_rx) = ChannelLink::new();
        let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
        let join = task.spawn();

        handle.init(ConnectionData::new("dev1")).await.unwrap();
        next_event(&mut link_rx).await;

        handle.push("ABC").await.unwrap();
        assert_eq!(
            next_event(&mut link_rx).await,
            LinkEvent::Pushed {
                message: None,
                state: LayerState::Written
            }
        );

        handle.close().await.unwrap();
        let stats = join.await.unwrap();
        assert_eq!(stats.messages_published, 1);
        assert_eq!(broker.published_count(), 1);
    }

    #[tokio::test]
    async fn test_push_before_init_is_rejected() {
        let broker = MemoryBroker::new();
        let (link, _link_rx) = ChannelLink::new();
        let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
        let _join = task.spawn();

        let result = handle.push("ABC").await;

        assert!(matches!(
            result,
            Err(GlueError::Layer(LayerState::InternalError))
        ));
    }

    #[tokio::test]
    async fn test_handle_after_close_reports_task_closed() {
        let broker = MemoryBroker::new();
        let (link, mut link_rx) = ChannelLink::new();
        let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
        let join = task.spawn();

        handle.close().await.unwrap();
        assert_eq!(next_event(&mut link_rx).await, LinkEvent::Closed(LayerState::Ok));
        join.await.unwrap();

        assert!(matches!(
            handle.push("late").await,
            Err(GlueError::TaskClosed)
        ));
    }

    #[tokio::test]
    async fn test_dropping_handles_closes_layer() {
        let broker = MemoryBroker::new();
        let (link, mut link_rx) = ChannelLink::new();
        let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
        let join = task.spawn();

        drop(handle);

        assert_eq!(next_event(&mut link_rx).await, LinkEvent::Closed(LayerState::Ok));
        assert_eq!(join.await.unwrap(), GlueStats::default());
    }
}
