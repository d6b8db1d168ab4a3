//! The Shard (spec §4.6/§5): a single-threaded-concurrency unit that owns an
//! [`AdmissionController`], a [`QuotaManager`], and a registry of live
//! [`Connection`]s. Everything shard-local needs no locks between shards;
//! cross-shard communication would go through message passing rather than
//! shared mutable state (spec's "shard-local state needs no locking"
//! invariant), modeled here with a [`slab::Slab`] keyed by stable indices the
//! way the intrusive connection list in other shard-per-core brokers works.

use crate::admission::AdmissionController;
use crate::config::Config;
use crate::dispatch::{error_response, Dispatch, RequestContext};
use crate::framer::{self, MemEstimatePolicy};
use crate::quota::QuotaManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;

/// Shard-local state shared by every connection handled on this shard:
/// one admission controller, one quota manager, and the registry of
/// currently-live connections (spec §5: "a shard owns its connections;
/// no connection outlives the shard that accepted it").
pub struct Shard {
    pub id: usize,
    pub admission: AdmissionController,
    pub quota: QuotaManager,
    pub mem_estimate_policy: MemEstimatePolicy,
    connections: Mutex<slab::Slab<()>>,
    pub tracker: TaskTracker,
}

impl Shard {
    pub fn new(id: usize, config: &Config) -> Self {
        Self {
            id,
            admission: AdmissionController::new(config.max_request_memory),
            quota: QuotaManager::new(config.quota_bytes_per_window, config.quota_window),
            mem_estimate_policy: MemEstimatePolicy {
                multiplier: config.mem_estimate_multiplier,
                overhead_bytes: config.mem_estimate_overhead_bytes,
            },
            connections: Mutex::new(slab::Slab::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Runs the per-connection processing loop described in spec §4.6: read
    /// a frame, account it against the quota, dispatch it, and submit the
    /// response to the connection's ordering barrier, until the stream ends,
    /// a fatal framing error occurs, or shutdown is signaled.
    ///
    /// `stream` is already split into read/write halves by the caller so the
    /// same loop serves both plaintext and TLS-wrapped streams.
    #[instrument(skip(self, stream, dispatcher, shutdown), fields(shard = self.id, addr = %remote_addr))]
    pub async fn handle_connection<S>(
        self: Arc<Self>,
        stream: S,
        remote_addr: SocketAddr,
        dispatcher: Arc<dyn Dispatch>,
        shutdown: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, write_half) = split(stream);
        let connection = Arc::new(Connection::new(remote_addr, write_half));

        let slot = {
            let mut connections = self.connections.lock().await;
            connections.insert(())
        };
        info!("accepted connection");

        let conn_cancel = connection.cancellation_token();
        let mut forced_shutdown = false;

        loop {
            let read_result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("shard shutting down; closing connection");
                    forced_shutdown = true;
                    break;
                }
                _ = conn_cancel.cancelled() => {
                    debug!("connection cancelled");
                    forced_shutdown = true;
                    break;
                }
                result = framer::read_request(&mut read_half, &self.admission, self.mem_estimate_policy) => result,
            };

            let request = match read_result {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "framing error on connection");
                    if e.is_fatal_to_connection() {
                        break;
                    }
                    continue;
                }
            };

            let correlation_id = request.correlation_id();
            let client_key = request.header.client_id.clone().unwrap_or_default();
            let byte_count = request.payload.len() as u64;

            let throttle = self.quota.record_and_throttle(&client_key, byte_count).await;
            if throttle.duration > std::time::Duration::ZERO && !throttle.first_violation {
                tokio::time::sleep(throttle.duration).await;
            }

            let dispatcher = Arc::clone(&dispatcher);
            connection.submit_response(async move {
                match dispatcher.dispatch(RequestContext { request: &request }).await {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(error = %err, correlation_id, "dispatch failed");
                        error_response(correlation_id, &err)
                    }
                }
            });
        }

        // Only a forced shutdown (external `stop()` or the connection's own
        // cancellation) should cancel in-flight writer work. A clean EOF or a
        // fatal framing error still has to let every already-submitted
        // response drain and be written, per spec §4.6 "await readyToRespond".
        if forced_shutdown {
            connection.shutdown();
        }
        match Arc::try_unwrap(connection) {
            Ok(connection) => connection.join().await,
            Err(_) => warn!("connection handle still shared at shutdown; skipping drain join"),
        }

        let mut connections = self.connections.lock().await;
        connections.remove(slot);
    }

    pub async fn live_connections(&self) -> usize {
        self.connections.lock().await.len()
    }
}
