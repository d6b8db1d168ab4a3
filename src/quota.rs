//! Per-client-id quota tracking, per spec §4.4.
//!
//! Each client-id gets a fixed-size byte allowance per window. The first
//! interval in which a client exceeds its allowance is reported but not
//! enforced by a sleep (`firstViolation = true`); subsequent violations
//! within the same window cause the caller to be told to back off for the
//! remainder of the window. This mirrors real Kafka client-quota semantics:
//! the first offense is informational, later offenses apply backpressure.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// The outcome of recording a client's request against its quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleResult {
    pub first_violation: bool,
    pub duration: Duration,
}

impl ThrottleResult {
    fn none() -> Self {
        Self {
            first_violation: false,
            duration: Duration::ZERO,
        }
    }
}

struct ClientBucket {
    window_start: Instant,
    bytes_in_window: u64,
    violated_this_window: bool,
}

/// Per-client-id token-bucket quota state, guarded the same way the original
/// broker state guarded its topic map: a single `RwLock` over a `HashMap`,
/// since quota tables are shard-local and writes are short-lived.
pub struct QuotaManager {
    bytes_per_window: u64,
    window: Duration,
    clients: RwLock<HashMap<String, ClientBucket>>,
}

impl QuotaManager {
    pub fn new(bytes_per_window: u64, window: Duration) -> Self {
        Self {
            bytes_per_window,
            window,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Records `byte_count` bytes of traffic for `client_id` and returns the
    /// throttle outcome. `client_id` of `None` is tracked under an anonymous
    /// bucket, same as any other client-id.
    #[instrument(skip(self))]
    pub async fn record_and_throttle(&self, client_id: &str, byte_count: u64) -> ThrottleResult {
        let now = Instant::now();
        let mut clients = self.clients.write().await;
        let bucket = clients.entry(client_id.to_string()).or_insert_with(|| ClientBucket {
            window_start: now,
            bytes_in_window: 0,
            violated_this_window: false,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.bytes_in_window = 0;
            bucket.violated_this_window = false;
        }

        bucket.bytes_in_window = bucket.bytes_in_window.saturating_add(byte_count);

        if bucket.bytes_in_window <= self.bytes_per_window {
            return ThrottleResult::none();
        }

        let elapsed = now.duration_since(bucket.window_start);
        let remaining = self.window.saturating_sub(elapsed);

        if !bucket.violated_this_window {
            bucket.violated_this_window = true;
            debug!(client_id, "first quota violation this window; not sleeping");
            ThrottleResult {
                first_violation: true,
                duration: remaining,
            }
        } else {
            debug!(client_id, ?remaining, "repeat quota violation; caller should sleep");
            ThrottleResult {
                first_violation: false,
                duration: remaining,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn under_allowance_is_never_throttled() {
        let qm = QuotaManager::new(1000, Duration::from_secs(1));
        let result = qm.record_and_throttle("alice", 100).await;
        assert_eq!(result, ThrottleResult::none());
    }

    #[tokio::test]
    async fn first_violation_is_informational_only() {
        let qm = QuotaManager::new(100, Duration::from_secs(60));
        let result = qm.record_and_throttle("bob", 200).await;
        assert!(result.first_violation);
        assert!(result.duration > Duration::ZERO);
    }

    #[tokio::test]
    async fn second_violation_in_same_window_is_not_first() {
        let qm = QuotaManager::new(100, Duration::from_secs(60));
        let first = qm.record_and_throttle("carol", 200).await;
        assert!(first.first_violation);

        let second = qm.record_and_throttle("carol", 50).await;
        assert!(!second.first_violation);
        assert!(second.duration > Duration::ZERO);
    }

    #[tokio::test]
    async fn different_clients_have_independent_buckets() {
        let qm = QuotaManager::new(100, Duration::from_secs(60));
        let a = qm.record_and_throttle("dave", 200).await;
        let b = qm.record_and_throttle("erin", 10).await;
        assert!(a.first_violation);
        assert_eq!(b, ThrottleResult::none());
    }
}
