//! Tunnel Gateway CLI
//!
//! Runs a glue layer against an in-process broker with a simulated edge
//! device, which is handy for checking tunnel behavior without a real broker.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tunnel_glue::{ChannelLink, GlueConfig, GlueTask, LinkEvent};
use tunnel_proto::{tunnel_topic, ConnectionData, LayerState, Qos, Retain, TunnelMessage};
use tunnel_transport::{MemoryBroker, MemorySession, SubscriptionEvent, TransportSession};

const LONG_VERSION: &str = concat!(
    env!("GIT_TAG"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Tunnel Gateway - carry an inner session to an edge device over pub/sub
#[derive(Parser, Debug)]
#[command(name = "tunnel-gateway")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the tunnel topic used for a peer
    Topic {
        /// Peer identity (device id / username)
        peer_id: String,
    },

    /// Tunnel messages to an echoing edge device on an in-process broker
    #[command(long_about = r#"
Start a glue layer and a simulated edge device on an in-process broker.
Each message is pushed through the tunnel, echoed by the device, and
pulled back out of the glue layer.

EXAMPLES:
  tunnel-gateway demo --peer-id device-42 hello world

ENVIRONMENT VARIABLES:
  TUNNEL_PEER_ID      Peer identity
  TUNNEL_PUBLISH_QOS  QoS of tunneled publishes (0, 1 or 2)
    "#)]
    Demo {
        /// Peer identity (device id / username)
        #[arg(long, env = "TUNNEL_PEER_ID", default_value = "edge-device")]
        peer_id: String,

        /// QoS of tunneled publishes (0, 1 or 2)
        #[arg(long, env = "TUNNEL_PUBLISH_QOS", default_value = "0")]
        publish_qos: u8,

        /// Retain tunneled publishes
        #[arg(long)]
        retain: bool,

        /// Seconds to wait for each tunnel event
        #[arg(long, default_value = "5")]
        timeout: u64,

        /// Messages to send through the tunnel
        #[arg(required = true)]
        messages: Vec<String>,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Simulated edge device: echoes every tunnel message back on the same topic
fn spawn_echo_device(broker: &MemoryBroker, topic: String) -> Result<MemorySession> {
    let session = broker.session();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    session
        .subscribe(
            &topic,
            Qos::AtMostOnce,
            Box::new(move |event| {
                if let SubscriptionEvent::Message { payload, .. } = event {
                    let _ = tx.send(payload);
                }
            }),
        )
        .context("Edge device failed to subscribe")?;

    let device = session.clone();
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            debug!("Edge device echoing {} bytes", payload.len());
            if let Err(e) = device.publish(
                &topic,
                TunnelMessage::new(payload),
                Qos::AtMostOnce,
                Retain::No,
                Box::new(|_| {}),
            ) {
                warn!("Edge device publish failed: {}", e);
            }
        }
    });

    Ok(session)
}

async fn next_link_event(
    rx: &mut mpsc::UnboundedReceiver<LinkEvent>,
    wait: Duration,
) -> Result<LinkEvent> {
    tokio::time::timeout(wait, rx.recv())
        .await
        .context("Timed out waiting for the tunnel")?
        .context("Glue layer stopped")
}

async fn run_demo(
    peer_id: String,
    publish_qos: u8,
    retain: bool,
    wait: Duration,
    messages: Vec<String>,
) -> Result<()> {
    let qos = match Qos::try_from(publish_qos) {
        Ok(qos) => qos,
        Err(value) => bail!("Invalid QoS {}, expected 0, 1 or 2", value),
    };
    let config = GlueConfig::default()
        .with_publish_qos(qos)
        .with_publish_retain(Retain::from(retain));

    let broker = MemoryBroker::new();
    let _device = spawn_echo_device(&broker, tunnel_topic(&peer_id))?;

    let (link, mut link_rx) = ChannelLink::new();
    let (task, handle) = GlueTask::new(Arc::new(broker.session()), link, config);
    let join = task.spawn();

    handle
        .init(ConnectionData::new(peer_id.clone()))
        .await
        .context("Failed to start tunnel")?;

    match next_link_event(&mut link_rx, wait).await? {
        LinkEvent::Connected(LayerState::Ok) => info!("Tunnel to {} is up", peer_id),
        other => bail!("Tunnel did not connect: {:?}", other),
    }

    for message in messages {
        handle
            .push(Bytes::from(message.clone().into_bytes()))
            .await
            .context("Failed to push message")?;
        info!("→ {}", message);

        // One WRITTEN continuation and one echoed pull per message, in either order
        let mut written = false;
        let mut echoed = false;
        while !(written && echoed) {
            match next_link_event(&mut link_rx, wait).await? {
                LinkEvent::Pushed {
                    state: LayerState::Written,
                    ..
                } => written = true,
                LinkEvent::Pulled {
                    message: Some(reply),
                    ..
                } => {
                    info!("← {}", String::from_utf8_lossy(&reply.payload));
                    echoed = true;
                }
                other => bail!("Unexpected tunnel event: {:?}", other),
            }
        }
    }

    handle.close().await.context("Failed to close tunnel")?;
    let stats = join.await.context("Glue task panicked")?;
    info!(
        "Tunnel closed: {} published ({} bytes), {} received ({} bytes)",
        stats.messages_published, stats.bytes_published, stats.messages_received, stats.bytes_received
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Topic { peer_id } => {
            println!("{}", tunnel_topic(&peer_id));
            Ok(())
        }
        Commands::Demo {
            peer_id,
            publish_qos,
            retain,
            timeout,
            messages,
        } => run_demo(peer_id, publish_qos, retain, Duration::from_secs(timeout), messages).await,
    }
}
