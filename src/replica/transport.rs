use crate::replica::peers::ReplicaId;
use crate::replica::raft_rpcs::RaftMessage;

/// RaftTransport is the replica's outbound RPC channel.
///
/// `send()` is fire-and-forget: a message may be delayed, duplicated, reordered or lost. The
/// transport delivers any reply back to the sending replica as a new inbound event, so `send()`
/// must never block the replica's event loop.
pub(crate) trait RaftTransport: Send {
    fn send(&self, to: &ReplicaId, message: RaftMessage);
}
