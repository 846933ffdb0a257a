//! End-to-end tunnel tests
//!
//! A gateway-side glue task and a simulated edge device share one in-memory
//! broker; everything the device publishes on its tunnel topic must come out
//! of the glue layer as a pull, and everything pushed into the glue layer
//! must reach the device.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;

use tunnel_glue::{ChannelLink, GlueConfig, GlueError, GlueTask, LinkEvent};
use tunnel_proto::{ConnectionData, LayerState, Qos, Retain, TunnelMessage};
use tunnel_transport::{MemoryBroker, MemorySession, SubscriptionEvent, TransportSession};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for link event")
        .expect("link closed")
}

/// Edge device end of the tunnel: subscribes to its own tunnel topic and
/// hands every delivery to the returned receiver.
fn edge_device(
    broker: &MemoryBroker,
    topic: &str,
) -> (MemorySession, mpsc::UnboundedReceiver<Bytes>) {
    let session = broker.session();
    let (tx, rx) = mpsc::unbounded_channel();
    session
        .subscribe(
            topic,
            Qos::AtMostOnce,
            Box::new(move |event| {
                if let SubscriptionEvent::Message { payload, .. } = event {
                    let _ = tx.send(payload);
                }
            }),
        )
        .unwrap();
    (session, rx)
}

fn device_publish(device: &MemorySession, topic: &str, payload: &'static str) {
    device
        .publish(
            topic,
            TunnelMessage::from(payload),
            Qos::AtMostOnce,
            Retain::No,
            Box::new(|_| {}),
        )
        .unwrap();
}

#[tokio::test]
async fn test_full_tunnel_roundtrip() {
    init_tracing();
    info!("=== Tunnel roundtrip: dev1 ===");

    let broker = MemoryBroker::new();
    let (device, mut device_rx) = edge_device(&broker, "$Tunnel/dev1");

    let (link, mut link_rx) = ChannelLink::new();
    let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
    let join = task.spawn();

    // STEP 1: init subscribes, connect follows the ack
    handle.init(ConnectionData::new("dev1")).await.unwrap();
    assert_eq!(next_event(&mut link_rx).await, LinkEvent::Connected(LayerState::Ok));
    assert_eq!(broker.subscriber_count("$Tunnel/dev1"), 2);

    // STEP 2: push is published to the device, then WRITTEN comes back
    handle.push("ABC").await.unwrap();
    let delivered = timeout(Duration::from_secs(2), device_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered, Bytes::from_static(b"ABC"));
    assert_eq!(
        next_event(&mut link_rx).await,
        LinkEvent::Pushed {
            message: None,
            state: LayerState::Written
        }
    );

    // STEP 3: device reply is pulled toward the application
    device_publish(&device, "$Tunnel/dev1", "XYZ");
    assert_eq!(
        next_event(&mut link_rx).await,
        LinkEvent::Pulled {
            message: Some(TunnelMessage::from("XYZ")),
            state: LayerState::Ok
        }
    );

    // STEP 4: close releases the tunnel
    handle.close().await.unwrap();
    assert_eq!(next_event(&mut link_rx).await, LinkEvent::Closed(LayerState::Ok));

    let stats = join.await.unwrap();
    assert_eq!(stats.messages_published, 1);
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.bytes_received, 3);
}

#[tokio::test]
async fn test_pushes_complete_in_order() {
    init_tracing();

    let broker = MemoryBroker::new();
    let (_device, mut device_rx) = edge_device(&broker, "$Tunnel/dev2");
    let (link, mut link_rx) = ChannelLink::new();
    let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
    let join = task.spawn();

    handle.init(ConnectionData::new("dev2")).await.unwrap();
    next_event(&mut link_rx).await;

    for payload in ["one", "two", "three"] {
        handle.push(payload).await.unwrap();
        assert_eq!(
            next_event(&mut link_rx).await,
            LinkEvent::Pushed {
                message: None,
                state: LayerState::Written
            }
        );
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(device_rx.recv().await.unwrap());
    }
    assert_eq!(received, vec!["one", "two", "three"]);

    handle.close().await.unwrap();
    assert_eq!(join.await.unwrap().messages_published, 3);
}

#[tokio::test]
async fn test_rejected_subscription_fails_connect() {
    init_tracing();

    let broker = MemoryBroker::new();
    broker.reject_subscriptions(true);
    let (link, mut link_rx) = ChannelLink::new();
    let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
    let _join = task.spawn();

    // Submission itself succeeds; the failure arrives as the connect state
    handle.init(ConnectionData::new("dev3")).await.unwrap();
    assert_eq!(
        next_event(&mut link_rx).await,
        LinkEvent::Connected(LayerState::SubscriptionFailed)
    );

    assert!(matches!(
        handle.push("ABC").await,
        Err(GlueError::Layer(LayerState::InternalError))
    ));
}

#[tokio::test]
async fn test_lost_outer_session_surfaces_on_push() {
    init_tracing();

    let broker = MemoryBroker::new();
    let (link, mut link_rx) = ChannelLink::new();
    let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
    let _join = task.spawn();

    handle.init(ConnectionData::new("dev4")).await.unwrap();
    next_event(&mut link_rx).await;

    broker.set_connected(false);
    assert!(matches!(
        handle.push("ABC").await,
        Err(GlueError::Layer(LayerState::NotConnected))
    ));
}

#[tokio::test]
async fn test_delivery_after_close_is_ignored() {
    init_tracing();

    let broker = MemoryBroker::new();
    let device = broker.session();
    let (link, mut link_rx) = ChannelLink::new();
    let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, GlueConfig::default());
    let join = task.spawn();

    handle.init(ConnectionData::new("dev5")).await.unwrap();
    next_event(&mut link_rx).await;
    handle.close().await.unwrap();
    assert_eq!(next_event(&mut link_rx).await, LinkEvent::Closed(LayerState::Ok));
    join.await.unwrap();

    // The broker still holds the stale subscription; delivering to it must not panic
    device_publish(&device, "$Tunnel/dev5", "late");
    assert!(link_rx.try_recv().is_err());
}
