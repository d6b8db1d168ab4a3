//! The Kafka Server (spec §4.6): owns listeners, accepts connections,
//! manages lifecycle, and aggregates the shard table and heartbeat manager
//! this broker runs.

use crate::config::{Config, ListenAddress};
use crate::dispatch::Dispatch;
use crate::raft::heartbeat::HeartbeatManager;
use crate::shard::Shard;
use anyhow::{Context, Result};
use rustls_pemfile::{certs, private_key};
use std::io::BufReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time;
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn, Instrument};

/// Owns the shard table, the listeners, and the heartbeat manager. `gate`
/// tracks every outstanding listener-accept and per-connection task so
/// `stop()` can await quiescence (spec §4.6's `{..., gate}` server state).
pub struct KafkaServer {
    config: Config,
    shards: Vec<Arc<Shard>>,
    dispatcher: Arc<dyn Dispatch>,
    heartbeat: Arc<HeartbeatManager>,
    gate: TaskTracker,
    shutdown: CancellationToken,
    next_shard: AtomicUsize,
}

impl KafkaServer {
    pub fn new(config: Config, dispatcher: Arc<dyn Dispatch>, heartbeat: Arc<HeartbeatManager>) -> Self {
        let shards = (0..config.shard_count.max(1))
            .map(|id| Arc::new(Shard::new(id, &config)))
            .collect();

        Self {
            config,
            shards,
            dispatcher,
            heartbeat,
            gate: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            next_shard: AtomicUsize::new(0),
        }
    }

    fn next_shard(&self) -> Arc<Shard> {
        let idx = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        Arc::clone(&self.shards[idx])
    }

    fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>> {
        let (Some(cert_path), Some(key_path)) = (&self.config.tls_cert_path, &self.config.tls_key_path) else {
            return Ok(None);
        };

        let cert_file = std::fs::File::open(cert_path)
            .with_context(|| format!("failed to open TLS cert file {cert_path:?}"))?;
        let key_file = std::fs::File::open(key_path)
            .with_context(|| format!("failed to open TLS key file {key_path:?}"))?;

        let cert_chain = certs(&mut BufReader::new(cert_file))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to parse TLS certificate chain")?;
        let private_key = private_key(&mut BufReader::new(key_file))
            .context("failed to parse TLS private key")?
            .ok_or_else(|| anyhow::anyhow!("no private key found in {key_path:?}"))?;

        let server_config = RustlsServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .context("invalid TLS certificate/key pair")?;

        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    }

    /// Runs every configured listener's accept loop concurrently, returning
    /// once all have stopped (normally because `stop()` was called).
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let tls_acceptor = self.tls_acceptor()?;

        let mut listener_tasks = Vec::new();
        for listen_addr in self.config.listen_addresses.clone() {
            let server = Arc::clone(self);
            let tls_acceptor = tls_acceptor.clone();
            listener_tasks.push(tokio::spawn(async move {
                if let Err(e) = server.accept_loop(listen_addr, tls_acceptor).await {
                    error!(error = %e, "listener accept loop exited with error");
                }
            }));
        }

        for task in listener_tasks {
            let _ = task.await;
        }

        Ok(())
    }

    /// Accept loop (per listener), per spec §4.6: accept, set TCP_NODELAY
    /// and keepalive, construct the connection, and spawn its processing
    /// task inside `gate`.
    #[instrument(skip(self, tls_acceptor), fields(addr = %listen_addr.socket_addr()))]
    async fn accept_loop(self: Arc<Self>, listen_addr: ListenAddress, tls_acceptor: Option<TlsAcceptor>) -> Result<()> {
        let listener = TcpListener::bind(listen_addr.socket_addr())
            .await
            .with_context(|| format!("failed to bind {}", listen_addr.socket_addr()))?;
        info!(tls = listen_addr.tls, "listening");

        loop {
            let accept_result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested; stopping accept loop");
                    break;
                }
                result = listener.accept() => result,
            };

            let (socket, addr) = match accept_result {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            if let Err(e) = socket.set_nodelay(true) {
                warn!(error = %e, "failed to set TCP_NODELAY");
            }
            if let Some(keepalive) = self.config.keepalive {
                let keepalive_config = socket2::TcpKeepalive::new().with_time(keepalive);
                let sock_ref = socket2::SockRef::from(&socket);
                if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive_config) {
                    warn!(error = %e, "failed to set TCP keepalive");
                }
            }

            let shard = self.next_shard();
            let dispatcher = Arc::clone(&self.dispatcher);
            let shutdown = self.shutdown.clone();
            let span = tracing::info_span!("connection", %addr, shard = shard.id);

            if listen_addr.tls {
                let Some(acceptor) = tls_acceptor.clone() else {
                    error!("TLS listener has no acceptor configured; dropping connection");
                    continue;
                };
                self.gate.spawn(
                    async move {
                        match acceptor.accept(socket).await {
                            Ok(tls_stream) => {
                                shard.handle_connection(tls_stream, addr, dispatcher, shutdown).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "TLS handshake failed");
                            }
                        }
                    }
                    .instrument(span),
                );
            } else {
                self.gate.spawn(
                    async move {
                        shard.handle_connection(socket, addr, dispatcher, shutdown).await;
                    }
                    .instrument(span),
                );
            }
        }

        Ok(())
    }

    /// Starts the heartbeat manager's tick loop under the same gate the
    /// connection tasks use, so it drains alongside them on shutdown.
    pub fn start_heartbeat(&self) {
        self.heartbeat.start();
    }

    /// Shutdown (spec §4.6 `stop()`):
    /// 1. Abort all listener accept loops.
    /// 2. Set the shutdown flag; per-connection loops observe it between requests.
    /// 3. Call `shutdown` on every open connection (closes both halves) — handled
    ///    inside each shard's connection loop once it observes the flag.
    /// 4. Await `gate` quiescence.
    pub async fn stop(&self, drain_timeout: time::Duration) {
        info!("stopping server");
        self.shutdown.cancel();
        self.heartbeat.stop().await;

        self.gate.close();
        match time::timeout(drain_timeout, self.gate.wait()).await {
            Ok(()) => info!("all connection tasks drained"),
            Err(_) => warn!("timed out waiting for connection tasks to drain"),
        }
    }
}
