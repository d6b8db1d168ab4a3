//! The Raft-adjacent heartbeat subsystem (spec §4.7–§4.8): batching
//! heartbeat dispatch across replication groups that share peers. Full log
//! replication and leader election are out of scope (spec §1 non-goal);
//! only the heartbeat liveness subsystem is modeled.

pub mod group;
pub mod heartbeat;
pub mod transport;
