use crate::actor::ActorClient;
use crate::api::types::{RaftEntryId, RaftLeaderInfo};
use crate::replica;
use bytes::Bytes;
use std::io;

/// Write side of the replicated log. Only the leader accepts entries; other replicas point the
/// caller at the leader they know of.
pub struct RaftReplicatedLog {
    actor_client: ActorClient,
}

impl RaftReplicatedLog {
    pub(crate) fn new(actor_client: ActorClient) -> Self {
        RaftReplicatedLog { actor_client }
    }

    /// `Ok` means the entry is on the leader's disk and being sent to followers, not that it is
    /// committed. Watch the commit stream for the returned id.
    pub async fn enqueue_entry(&self, input: EnqueueEntryInput) -> Result<EnqueueEntryOutput, EnqueueEntryError> {
        let output = self
            .actor_client
            .enqueue_for_replication(replica::EnqueueForReplicationInput { data: input.data })
            .await?;

        Ok(EnqueueEntryOutput::from(output))
    }
}

#[derive(Debug)]
pub struct EnqueueEntryInput {
    pub data: Bytes,
}

#[derive(Debug)]
pub struct EnqueueEntryOutput {
    pub entry_id: RaftEntryId,
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueEntryError {
    #[error("Not leader, try {0:?}")]
    LeaderRedirect(RaftLeaderInfo),

    // An election is probably running. Retry after roughly one election timeout.
    #[error("No known leader")]
    NoLeader,

    // The local replica has halted; every later call fails with the same error.
    #[error("Failed to persist entry locally")]
    LocalIoError(io::Error),

    #[error("Replica task has exited")]
    ReplicaExited,
}

impl From<replica::EnqueueForReplicationOutput> for EnqueueEntryOutput {
    fn from(output: replica::EnqueueForReplicationOutput) -> Self {
        EnqueueEntryOutput {
            entry_id: RaftEntryId {
                term: output.enqueued_term,
                entry_index: output.enqueued_index,
            },
        }
    }
}

impl From<replica::EnqueueForReplicationError> for EnqueueEntryError {
    fn from(error: replica::EnqueueForReplicationError) -> Self {
        match error {
            replica::EnqueueForReplicationError::LeaderRedirect(leader) => {
                EnqueueEntryError::LeaderRedirect(RaftLeaderInfo::from(leader))
            }
            replica::EnqueueForReplicationError::NoLeader => EnqueueEntryError::NoLeader,
            replica::EnqueueForReplicationError::LocalIoError(e) => EnqueueEntryError::LocalIoError(e),
            replica::EnqueueForReplicationError::ActorExited => EnqueueEntryError::ReplicaExited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::Index;
    use crate::replica::{LeaderRedirectInfo, ReplicaId, Term};
    use std::net::Ipv4Addr;

    #[test]
    fn redirect_carries_leader_address() {
        let error = EnqueueEntryError::from(replica::EnqueueForReplicationError::LeaderRedirect(
            LeaderRedirectInfo {
                replica_id: ReplicaId::new("replica-3"),
                ip_addr: Ipv4Addr::LOCALHOST,
                port: 24103,
            },
        ));

        match error {
            EnqueueEntryError::LeaderRedirect(leader) => {
                assert_eq!(leader.replica_id, "replica-3");
                assert_eq!(leader.ip_addr, Ipv4Addr::LOCALHOST);
                assert_eq!(leader.raft_rpc_port, 24103);
            }
            other => panic!("Unexpected {:?}", other),
        }
    }

    #[test]
    fn actor_exit_surfaces_as_replica_exited() {
        assert!(matches!(
            EnqueueEntryError::from(replica::EnqueueForReplicationError::ActorExited),
            EnqueueEntryError::ReplicaExited
        ));
    }

    #[test]
    fn output_exposes_entry_id() {
        let output = EnqueueEntryOutput::from(replica::EnqueueForReplicationOutput {
            enqueued_term: Term::new(4),
            enqueued_index: Index::new(9),
        });

        assert_eq!((output.entry_id.term(), output.entry_id.index()), (4, 9));
    }
}
