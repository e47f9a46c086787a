//! Out-of-band TCP messaging node
//!
//! Runs a single process of a job: listens for peers, connects to the
//! peers named on the command line and logs everything it receives.

mod cli;
mod config;
mod topology;

use anyhow::{Context, Result};
use cli::{Cli, PeerSpec};
use oob_core::{OutboundMessage, ProcessName};
use oob_metrics::MetricsSnapshot;
use oob_tcp::{Collaborators, TcpComponent, TcpConfig, TokenAuthenticator, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Interval;
use topology::{LoggingFramework, StaticTopology};
use tracing_subscriber::EnvFilter;

/// Tag carried by the startup greeting
const HELLO_TAG: u32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = config::build_config(&cli)?;
    run_node(&cli, config).await
}

fn collaborators(cli: &Cli) -> Result<Collaborators> {
    let mut collab = Collaborators::new(
        Arc::new(StaticTopology::new(cli.lifeline.clone())),
        Arc::new(LoggingFramework),
    );
    if let Some(token) = &cli.auth_token {
        let auth = TokenAuthenticator::from_hex(token).map_err(anyhow::Error::msg)?;
        collab = collab.with_authenticator(Arc::new(auth));
    }
    Ok(collab)
}

fn hello(local: &ProcessName, peer: &PeerSpec) -> OutboundMessage {
    let text = format!("hello from {}", local);
    OutboundMessage::new(local.clone(), peer.name.clone(), HELLO_TAG, text.into_bytes())
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_node(cli: &Cli, config: TcpConfig) -> Result<()> {
    tracing::info!("Starting oob node {}", config.local_name);
    tracing::info!("Handshake version: {}", config.version);

    let mut tcp = TcpComponent::init(config, collaborators(cli)?).await?;
    let mut events = tcp.take_events().context("event stream already taken")?;
    tracing::info!("Contact URI: {}", tcp.contact_uri());

    for peer in &cli.peers {
        let count = tcp
            .set_peer_address(peer.name.clone(), peer.family, &peer.host, &peer.ports)
            .await
            .with_context(|| format!("adding address of {}", peer.name))?;
        tracing::info!("Peer {} at {} ({} addresses)", peer.name, peer.host, count);
    }

    if cli.send_hello {
        for peer in &cli.peers {
            tcp.send(hello(tcp.local_name(), peer))?;
        }
    }

    let mut ticker = (cli.ping_interval > 0)
        .then(|| tokio::time::interval(Duration::from_secs(cli.ping_interval)));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Message(msg)) => {
                    tracing::info!(
                        origin = %msg.origin,
                        tag = msg.tag,
                        len = msg.payload.len(),
                        "received: {}",
                        String::from_utf8_lossy(&msg.payload)
                    );
                }
                Some(TransportEvent::PeerConnected(peer)) => tracing::info!(%peer, "peer connected"),
                Some(TransportEvent::PeerLost(peer)) => tracing::warn!(%peer, "peer lost"),
                Some(TransportEvent::PeerUnreachable(peer)) => tracing::warn!(%peer, "peer unreachable"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = tick(&mut ticker) => {
                for peer in &cli.peers {
                    tcp.ping(peer.name.clone())?;
                }
            }
        }
    }

    for snapshot in tcp.peer_snapshots().await? {
        tracing::info!("{}", serde_json::to_string(&snapshot)?);
    }

    let metrics = tcp.metrics();
    tcp.finalize().await?;
    println!("{}", MetricsSnapshot::from_metrics(&metrics).to_json()?);

    tracing::info!("Node stopped");
    Ok(())
}
