//! The Peer Transport Facade (spec §4.8): the abstract send/receive
//! interface to remote nodes used by the heartbeat manager. Connection
//! pooling, reconnect, and backoff are an external collaborator's
//! responsibility and out of scope here; this module defines only the
//! contract plus test doubles.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A node identity, shared with [`super::group::GroupId`]'s peer sets.
pub type NodeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u64);

/// A single group's heartbeat entry carried in a batched [`HeartbeatRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatEntry {
    pub group_id: GroupId,
    pub term: u64,
    pub commit_index: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
}

/// One outgoing batched heartbeat, carrying an entry per group whose peer
/// set includes the destination peer.
#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub source_node: NodeId,
    pub entries: Vec<HeartbeatEntry>,
}

/// A single group's reply entry within a batched [`HeartbeatReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyEntry {
    pub group_id: GroupId,
    pub success: bool,
    pub term: u64,
    pub last_log_index: u64,
}

#[derive(Debug, Clone)]
pub struct HeartbeatReply {
    pub entries: Vec<ReplyEntry>,
}

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("heartbeat to peer {0} timed out")]
    Timeout(NodeId),
    #[error("heartbeat to peer {0} failed: {1}")]
    Unreachable(NodeId, String),
}

/// Contract: each call terminates by `deadline` with either a reply or a
/// transport error; it is safe to call concurrently for distinct peers; and
/// cancellation on manager shutdown propagates to in-flight calls.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn heartbeat(
        &self,
        peer: NodeId,
        request: HeartbeatRequest,
        deadline: Duration,
    ) -> Result<HeartbeatReply, TransportError>;
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// A transport double whose per-peer behavior is configured up front:
    /// a scripted reply, a transport error, or an artificial delay used to
    /// exercise deadline handling.
    pub struct ScriptedTransport {
        replies: Mutex<HashMap<NodeId, Result<HeartbeatReply, TransportError>>>,
        delay: Mutex<HashMap<NodeId, Duration>>,
        pub calls: Mutex<Vec<(NodeId, HeartbeatRequest)>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self {
                replies: Mutex::new(HashMap::new()),
                delay: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub async fn set_reply(&self, peer: NodeId, reply: Result<HeartbeatReply, TransportError>) {
            self.replies.lock().await.insert(peer, reply);
        }

        pub async fn set_delay(&self, peer: NodeId, delay: Duration) {
            self.delay.lock().await.insert(peer, delay);
        }
    }

    #[async_trait]
    impl PeerTransport for ScriptedTransport {
        async fn heartbeat(
            &self,
            peer: NodeId,
            request: HeartbeatRequest,
            _deadline: Duration,
        ) -> Result<HeartbeatReply, TransportError> {
            self.calls.lock().await.push((peer, request));

            if let Some(delay) = self.delay.lock().await.get(&peer).copied() {
                tokio::time::sleep(delay).await;
            }

            match self.replies.lock().await.get(&peer) {
                Some(result) => result.clone(),
                None => Ok(HeartbeatReply { entries: Vec::new() }),
            }
        }
    }
}
