//! The Heartbeat Manager (spec §4.7): batches heartbeats across many
//! replication groups sharing peers so each tick sends at most one RPC per
//! peer, no matter how many groups have that peer in their peer set.

use crate::raft::group::ReplicationGroup;
use crate::raft::transport::{
    GroupId, HeartbeatEntry, HeartbeatRequest, NodeId, PeerTransport, TransportError,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, trace, warn};

/// Ordered by groupId for O(log n) lookup/iteration, per spec §4.7's state
/// description ("an ordered set of group handles, keyed by groupId").
type GroupTable = BTreeMap<u64, Arc<dyn ReplicationGroup>>;

pub struct HeartbeatManager {
    node_id: NodeId,
    interval: Duration,
    transport: Arc<dyn PeerTransport>,
    groups: Mutex<GroupTable>,
    /// Per-peer outstanding-dispatch gate, capacity 1: a peer with a
    /// dispatch still in flight is skipped on the next tick rather than
    /// stacking another RPC behind it (spec §4.7 step 3).
    peer_permits: Mutex<HashMap<NodeId, Arc<Semaphore>>>,
    gate: TaskTracker,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    pub fn new(node_id: NodeId, interval: Duration, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            node_id,
            interval,
            transport,
            groups: Mutex::new(BTreeMap::new()),
            peer_permits: Mutex::new(HashMap::new()),
            gate: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Idempotent by groupId: re-registering the same id replaces the
    /// handle rather than producing a duplicate entry.
    pub async fn register_group(&self, group: Arc<dyn ReplicationGroup>) {
        let id = group.group_id().0;
        self.groups.lock().await.insert(id, group);
        debug!(group_id = id, "registered replication group");
    }

    /// Pending replies for a deregistered group are discarded silently: the
    /// group simply stops appearing in future ticks' snapshots.
    pub async fn deregister_group(&self, id: GroupId) {
        self.groups.lock().await.remove(&id.0);
        debug!(group_id = id.0, "deregistered replication group");
    }

    /// Arms the tick loop as a background task tracked by `gate`, so
    /// `stop()` can await its clean exit. `self` must be wrapped in an `Arc`
    /// since the spawned task outlives this call.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        self.gate.spawn(async move {
            let mut last_tick = Instant::now();
            loop {
                let next_tick = last_tick + manager.interval;
                tokio::select! {
                    biased;
                    _ = manager.cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(next_tick) => {}
                }

                let now = Instant::now();
                last_tick = now;
                manager.dispatch_heartbeats().await;
            }
        });
    }

    /// Cancels the timer, signals shutdown, and awaits every in-flight
    /// per-peer dispatch task tracked by `gate`.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.gate.close();
        self.gate.wait().await;
    }

    /// One sweep: group entries by destination peer, dispatch at most one
    /// RPC per peer, and fan results back to the owning groups.
    #[instrument(skip(self))]
    pub async fn dispatch_heartbeats(self: &Arc<Self>) {
        let mut by_peer: HashMap<NodeId, (Vec<Arc<dyn ReplicationGroup>>, Vec<HeartbeatEntry>)> =
            HashMap::new();

        {
            let groups = self.groups.lock().await;
            for group in groups.values() {
                let snapshot = group.snapshot();
                for peer in group.peers() {
                    if peer == self.node_id {
                        continue;
                    }
                    let entry = HeartbeatEntry {
                        group_id: group.group_id(),
                        term: snapshot.term,
                        commit_index: snapshot.commit_index,
                        prev_log_index: snapshot.prev_log_index,
                        prev_log_term: snapshot.prev_log_term,
                    };
                    let bucket = by_peer.entry(peer).or_default();
                    bucket.0.push(Arc::clone(group));
                    bucket.1.push(entry);
                }
            }
        }

        if by_peer.is_empty() {
            trace!("tick produced no entries; no-op");
            return;
        }

        for (peer, (groups, entries)) in by_peer {
            let permit = {
                let mut permits = self.peer_permits.lock().await;
                Arc::clone(permits.entry(peer).or_insert_with(|| Arc::new(Semaphore::new(1))))
            };

            let owned_permit = match Arc::clone(&permit).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!(peer, "peer already has an outstanding heartbeat; skipping this tick");
                    continue;
                }
            };

            let transport = Arc::clone(&self.transport);
            let node_id = self.node_id;
            let deadline = self.interval;

            self.gate.spawn(async move {
                let _permit = owned_permit;
                let request = HeartbeatRequest {
                    source_node: node_id,
                    entries,
                };

                let result = tokio::time::timeout(deadline, transport.heartbeat(peer, request, deadline)).await;

                match result {
                    Ok(Ok(reply)) => {
                        for entry in reply.entries {
                            if let Some(group) = groups.iter().find(|g| g.group_id() == entry.group_id) {
                                group.process_reply(peer, Ok(entry)).await;
                            }
                            // Unknown groupIds (races with deregister) are
                            // dropped, per spec §4.7 step 5.
                        }
                    }
                    Ok(Err(_)) | Err(_) => {
                        warn!(peer, "heartbeat transport failure or timeout");
                        for group in &groups {
                            group.process_reply(peer, Err(())).await;
                        }
                    }
                }
                // `_permit` drops here, releasing the per-peer gate.
            });
        }
    }
}
