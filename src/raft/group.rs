//! ReplicationGroup (spec §3, referenced as external): the heartbeat
//! manager's view of a single Raft-style replication group. The manager
//! reads an immutable snapshot of a group once per tick and never mutates
//! group state directly — all state changes happen inside the group's own
//! `process_reply` callback, which the manager invokes once per reply entry
//! (or once per group on transport failure).

use crate::raft::transport::{GroupId, NodeId, ReplyEntry};
use async_trait::async_trait;

/// The fields of a group's state the manager needs to build one
/// [`crate::raft::transport::HeartbeatEntry`] for it, snapshotted at the
/// start of a tick so an in-flight dispatch never observes a torn read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub term: u64,
    pub commit_index: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
}

/// A replication group registered with the heartbeat manager. Real log
/// replication and leader election (spec §1 non-goal) live behind this
/// trait; only the heartbeat-relevant surface is modeled.
#[async_trait]
pub trait ReplicationGroup: Send + Sync {
    fn group_id(&self) -> GroupId;

    /// The group's current peer set, excluding self. Read once per tick;
    /// membership changes take effect on the next tick, per spec §4.7's
    /// "ordering and correctness" notes.
    fn peers(&self) -> Vec<NodeId>;

    fn snapshot(&self) -> GroupSnapshot;

    /// Invoked once per reply entry addressed to this group on transport
    /// success, or once per group in the batch (with `Err(())`) on
    /// transport failure or timeout.
    async fn process_reply(&self, peer: NodeId, result: Result<ReplyEntry, ()>);
}
