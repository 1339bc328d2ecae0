use crate::api::{RaftCommitStream, RaftEventListener, RaftReplicatedLog};
use crate::server::RpcServerShutdownHandle;

/// RaftClient is everything an application needs to use the local raft replica. Dropping it stops
/// the replica's RPC server and, once in-flight work drains, the replica itself.
pub struct RaftClient {
    pub replicated_log: RaftReplicatedLog,
    pub commit_stream: RaftCommitStream,
    pub event_listener: RaftEventListener,
    pub(super) server_shutdown_handle: RpcServerShutdownHandle,
}

impl RaftClient {
    /// Split the client up so its parts can be used from different tasks. The returned handle must
    /// be kept alive for as long as the replica should keep serving peers.
    pub fn into_parts(self) -> (RaftReplicatedLog, RaftCommitStream, RaftEventListener, RaftServerGuard) {
        (
            self.replicated_log,
            self.commit_stream,
            self.event_listener,
            RaftServerGuard {
                _server_shutdown_handle: self.server_shutdown_handle,
            },
        )
    }
}

/// Keeps the replica's RPC server running until dropped.
pub struct RaftServerGuard {
    _server_shutdown_handle: RpcServerShutdownHandle,
}
