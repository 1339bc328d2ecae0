use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::{ReplicaId, ReplicaMetadata};
use bytes::Bytes;
use std::io;
use std::net::Ipv4Addr;

#[derive(Debug)]
pub(crate) struct EnqueueForReplicationInput {
    pub(crate) data: Bytes,
}

#[derive(Debug)]
pub(crate) struct EnqueueForReplicationOutput {
    pub(crate) enqueued_term: Term,
    pub(crate) enqueued_index: Index,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum EnqueueForReplicationError {
    #[error("Not leader, redirect to {0:?}")]
    LeaderRedirect(LeaderRedirectInfo),

    #[error("No known leader")]
    NoLeader,

    // Also returned for every enqueue after the replica has halted.
    #[error("Failed to persist entry: {0}")]
    LocalIoError(io::Error),

    #[error("Replica actor has exited")]
    ActorExited,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeaderRedirectInfo {
    pub(crate) replica_id: ReplicaId,
    pub(crate) ip_addr: Ipv4Addr,
    pub(crate) port: u16,
}

impl From<&ReplicaMetadata> for LeaderRedirectInfo {
    fn from(metadata: &ReplicaMetadata) -> Self {
        LeaderRedirectInfo {
            replica_id: metadata.replica_id().clone(),
            ip_addr: metadata.ip_addr(),
            port: metadata.port(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HandleMessageError {
    #[error("Sender {0} is not in the cluster")]
    SenderNotInCluster(ReplicaId),
    #[error("Malformed message from {0}: {1}")]
    MalformedMessage(ReplicaId, &'static str),
    #[error("Local durable storage failed: {0}")]
    StorageFailure(io::Error),
    #[error("Replica has halted after a durable storage failure")]
    Halted,
    #[error("Replica actor has exited")]
    ActorExited,
}

/// HeartbeatTick is a single tick of a leader's heartbeat timer for a given term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct HeartbeatTick {
    pub(crate) term: Term,
}
