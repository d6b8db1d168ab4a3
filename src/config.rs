//! Defines configuration for our Kafka broker, including reading
//! from environment variables or an optional `.env` file.

use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A single listener address, plaintext or TLS.
///
/// TLS is selected purely by the presence of credentials: if `tls` is
/// `true` the server expects [`Config::tls_cert_path`]/[`Config::tls_key_path`]
/// to be set, per spec: "its presence switches that listener to TLS".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl ListenAddress {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses a single `host:port` or `host:port:tls` entry.
    fn parse(entry: &str) -> anyhow::Result<Self> {
        let mut parts = entry.split(':');
        let host = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("listen address missing host: {entry:?}"))?
            .to_string();
        let port: u16 = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("listen address missing port: {entry:?}"))?
            .parse()?;
        let tls = match parts.next() {
            None => false,
            Some("tls") => true,
            Some(other) => {
                return Err(anyhow::anyhow!(
                    "unrecognized listen address qualifier {other:?} in {entry:?}"
                ))
            }
        };
        Ok(Self { host, port, tls })
    }
}

/// Represents the runtime configuration for the Kafka broker.
///
/// Constructed by reading environment variables (optionally from a `.env` file)
/// and falling back to sensible defaults if missing.
#[derive(Debug)]
pub struct Config {
    /// One or more addresses to listen on; each may be plaintext or TLS.
    pub listen_addresses: Vec<ListenAddress>,
    /// Timeout in seconds for draining client tasks during shutdown.
    pub client_drain_timeout_secs: u64,
    /// TCP keepalive applied to every accepted connection, if set.
    pub keepalive: Option<Duration>,
    /// PEM certificate chain path, required when any listener has `tls = true`.
    pub tls_cert_path: Option<String>,
    /// PEM private key path, required when any listener has `tls = true`.
    pub tls_key_path: Option<String>,
    /// Shard admission capacity: sum of in-flight `admittedMemory` per shard.
    pub max_request_memory: usize,
    /// Number of shards (message-passing domains) to run.
    pub shard_count: usize,
    /// Heartbeat manager tick period.
    pub heartbeat_interval: Duration,
    /// Multiplier applied to the request `size` when estimating admission cost.
    pub mem_estimate_multiplier: usize,
    /// Fixed per-request bookkeeping overhead added to the admission estimate.
    pub mem_estimate_overhead_bytes: usize,
    /// This node's identity, used as `sourceNode` in outgoing heartbeats.
    pub node_id: u64,
    /// Per-client-id quota allowance, in bytes, per [`Config::quota_window`].
    pub quota_bytes_per_window: u64,
    /// The quota window's duration.
    pub quota_window: Duration,
}

impl Config {
    /// Loads configuration by attempting to read environment variables from a
    /// `.env` file (if present). If `.env` is missing, a warning is logged and
    /// defaults are used. If `.env` is found but cannot be parsed, an error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a `.env` file is found but cannot be parsed. If the
    /// file is merely missing, a warning is logged instead of returning an error.
    pub fn from_env() -> anyhow::Result<Self> {
        // Attempt to load environment variables from `.env`.
        match dotenvy::dotenv() {
            Ok(path) => {
                info!("Loaded environment variables from {:?}", path);
            }
            Err(e) if e.not_found() => {
                // If it's just that `.env` is missing, log and keep going.
                warn!("No .env file found; relying on environment variables or defaults.");
            }
            Err(e) => {
                // If it's another error (e.g., permission denied or parse error),
                // return an error so we don't silently ignore it.
                return Err(e.into());
            }
        }

        // For debug purposes, log all environment variables.
        debug!("Environment variables: {:#?}", env::vars());

        let listen_addresses = match env::var("LISTEN_ADDRESSES") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ListenAddress::parse)
                .collect::<anyhow::Result<Vec<_>>>()?,
            Err(_) => {
                // Fall back to the single host/port pair the teacher's
                // original config surface exposed.
                let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port: u16 = env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(9092);
                vec![ListenAddress { host, port, tls: false }]
            }
        };

        let client_drain_timeout_secs: u64 = env::var("CLIENT_DRAIN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let keepalive = env::var("KEEPALIVE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs);

        let tls_cert_path = env::var("TLS_CERT_PATH").ok();
        let tls_key_path = env::var("TLS_KEY_PATH").ok();

        if listen_addresses.iter().any(|l| l.tls) && (tls_cert_path.is_none() || tls_key_path.is_none()) {
            return Err(anyhow::anyhow!(
                "a TLS listener is configured but TLS_CERT_PATH/TLS_KEY_PATH are not both set"
            ));
        }

        let max_request_memory: usize = env::var("MAX_REQUEST_MEMORY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100 * 1024 * 1024);

        let shard_count: usize = env::var("SHARD_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

        let heartbeat_interval_ms: u64 = env::var("HEARTBEAT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        let mem_estimate_multiplier: usize = env::var("MEM_ESTIMATE_MULTIPLIER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let mem_estimate_overhead_bytes: usize = env::var("MEM_ESTIMATE_OVERHEAD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8000);

        let node_id: u64 = env::var("NODE_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let quota_bytes_per_window: u64 = env::var("QUOTA_BYTES_PER_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10 * 1024 * 1024);

        let quota_window_ms: u64 = env::var("QUOTA_WINDOW_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        Ok(Self {
            listen_addresses,
            client_drain_timeout_secs,
            keepalive,
            tls_cert_path,
            tls_key_path,
            max_request_memory,
            shard_count,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            mem_estimate_multiplier,
            mem_estimate_overhead_bytes,
            node_id,
            quota_bytes_per_window,
            quota_window: Duration::from_millis(quota_window_ms),
        })
    }
}
