//! # Kafka Broker (Rust Implementation)
//!
//! Initializes logging, loads configuration, starts the shard table and its
//! listeners, runs the heartbeat manager, and supports graceful shutdown via
//! Ctrl+C (SIGINT) with a draining phase for active connections.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

mod admission;
mod config;
mod connection;
mod dispatch;
mod framer;
mod kafka_protocol;
mod quota;
mod raft;
mod server;
mod shard;

use crate::config::Config;
use crate::dispatch::EchoDispatcher;
use crate::raft::heartbeat::HeartbeatManager;
use crate::server::KafkaServer;

/// Sets up tracing/logging by reading the `RUST_LOG` environment variable or
/// using default levels if `RUST_LOG` isn't set.
fn setup() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting Kafka broker...");
    Ok(())
}

/// Runs the server loop in parallel with a shutdown listener (Ctrl+C). When
/// Ctrl+C is pressed, the server's `stop()` is driven through its full
/// shutdown sequence (spec §4.6): abort accept loops, set the shutdown flag,
/// close every open connection, and await `gate` quiescence.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let heartbeat = Arc::new(HeartbeatManager::new(
        config.node_id,
        config.heartbeat_interval,
        Arc::new(NoopTransport),
    ));

    let dispatcher = Arc::new(EchoDispatcher);
    let server = Arc::new(KafkaServer::new(config, dispatcher, heartbeat));

    server.start_heartbeat();

    let run_server = Arc::clone(&server);
    let run_handle = tokio::spawn(async move {
        if let Err(e) = run_server.run().await {
            error!(error = %e, "server run loop exited with error");
        }
    });

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("SIGINT (Ctrl+C) received, triggering shutdown...");

    server.stop(Duration::from_secs(5)).await;
    let _ = run_handle.await;

    info!("Server has shut down gracefully.");
    Ok(())
}

/// A heartbeat transport with no configured peers; a real deployment wires
/// in a concrete [`crate::raft::transport::PeerTransport`] (e.g. one backed
/// by pooled gRPC or TCP connections to sibling nodes).
struct NoopTransport;

#[async_trait::async_trait]
impl crate::raft::transport::PeerTransport for NoopTransport {
    async fn heartbeat(
        &self,
        peer: crate::raft::transport::NodeId,
        _request: crate::raft::transport::HeartbeatRequest,
        _deadline: Duration,
    ) -> Result<crate::raft::transport::HeartbeatReply, crate::raft::transport::TransportError> {
        Err(crate::raft::transport::TransportError::Unreachable(
            peer,
            "no peer transport configured".to_string(),
        ))
    }
}

/// The main entry point for the Kafka broker.
///
/// 1) Sets up tracing/logging.
/// 2) Loads configuration from environment.
/// 3) Runs the server loop with graceful shutdown, including connection draining.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup()?;

    let config = Config::from_env()?;

    run_server(config).await
}
