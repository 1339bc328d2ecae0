use crate::commitlog::Index;
use crate::replica;
use crate::replica::Term;
use std::net::Ipv4Addr;

/// Identifies a log entry. Returned when enqueueing and attached to the entry once it's
/// committed, so the application can match the two up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RaftEntryId {
    pub(crate) term: Term,
    pub(crate) entry_index: Index,
}

impl RaftEntryId {
    pub fn term(&self) -> u64 {
        self.term.as_u64()
    }

    pub fn index(&self) -> u64 {
        self.entry_index.as_u64()
    }
}

#[derive(Clone, Debug)]
pub struct RaftMemberInfo {
    pub replica_id: String,
    pub ip_addr: Ipv4Addr,
    pub raft_rpc_port: u16,
}

impl From<RaftMemberInfo> for replica::ReplicaMetadata {
    fn from(member_info: RaftMemberInfo) -> Self {
        Self::new(
            replica::ReplicaId::new(member_info.replica_id),
            member_info.ip_addr,
            member_info.raft_rpc_port,
        )
    }
}

/// Where to find the leader, when the local replica isn't it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftLeaderInfo {
    pub replica_id: String,
    pub ip_addr: Ipv4Addr,
    pub raft_rpc_port: u16,
}

impl From<replica::LeaderRedirectInfo> for RaftLeaderInfo {
    fn from(internal_leader: replica::LeaderRedirectInfo) -> Self {
        Self {
            replica_id: internal_leader.replica_id.into_inner(),
            ip_addr: internal_leader.ip_addr,
            raft_rpc_port: internal_leader.port,
        }
    }
}
