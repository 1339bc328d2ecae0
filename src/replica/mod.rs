mod commit_tracker;
mod election;
mod local_state;
mod peers;
mod raft_rpcs;
mod replica;
mod replica_api;
mod transport;
mod write_ahead_log;

#[cfg(test)]
mod test_utils;

pub(crate) use election::ActorTimers;
pub(crate) use election::ElectionStateChangeListener;
pub(crate) use election::ElectionStateSnapshot;
pub(crate) use local_state::DiskLocalState;
pub(crate) use local_state::PersistentLocalState;
pub use local_state::Term;
pub(crate) use local_state::VolatileLocalState;
pub(crate) use peers::ClusterTracker;
pub use peers::ReplicaId;
pub(crate) use peers::ReplicaMetadata;
pub(crate) use raft_rpcs::AppendEntries;
pub(crate) use raft_rpcs::AppendEntriesReply;
pub(crate) use raft_rpcs::LogEntry;
pub(crate) use raft_rpcs::RaftMessage;
pub(crate) use raft_rpcs::RequestVote;
pub(crate) use raft_rpcs::RequestVoteReply;
pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub(crate) use replica_api::EnqueueForReplicationError;
pub(crate) use replica_api::EnqueueForReplicationInput;
pub(crate) use replica_api::EnqueueForReplicationOutput;
pub(crate) use replica_api::HandleMessageError;
pub(crate) use replica_api::HeartbeatTick;
pub(crate) use replica_api::LeaderRedirectInfo;
pub(crate) use transport::RaftTransport;
pub(crate) use write_ahead_log::new_commit_stream;
pub(crate) use write_ahead_log::CommitStream;
pub(crate) use write_ahead_log::CommitStreamPublisher;
pub(crate) use write_ahead_log::CommittedEntry;
pub(crate) use write_ahead_log::WriteAheadLogEntry;
