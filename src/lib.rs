mod actor;
mod api;
mod commitlog;
mod replica;
mod server;
mod grpc {
    include!("../generated/raft.rs");
}

pub use api::try_create_raft_client;
pub use api::EnqueueEntryError;
pub use api::EnqueueEntryInput;
pub use api::EnqueueEntryOutput;
pub use api::RaftClient;
pub use api::RaftClientConfig;
pub use api::RaftClientCreationError;
pub use api::RaftCommitStream;
pub use api::RaftCommittedEntry;
pub use api::RaftElectionState;
pub use api::RaftEntryId;
pub use api::RaftEvent;
pub use api::RaftEventListener;
pub use api::RaftLeaderInfo;
pub use api::RaftMemberInfo;
pub use api::RaftOptions;
pub use api::RaftReplicatedLog;
pub use api::RaftServerGuard;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
