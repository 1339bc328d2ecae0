use crate::actor::{ActorClient, Event, ReplicaActor};
use crate::api::client::RaftClient;
use crate::api::options::RaftOptionsValidated;
use crate::api::types::RaftMemberInfo;
use crate::api::{RaftCommitStream, RaftEventListener, RaftOptions, RaftReplicatedLog};
use crate::commitlog::{FileLog, InMemoryLog, Log};
use crate::replica::{
    new_commit_stream, ActorTimers, ClusterTracker, CommitStreamPublisher, DiskLocalState, ElectionStateChangeListener,
    PersistentLocalState, Replica, ReplicaConfig, ReplicaId, ReplicaMetadata, VolatileLocalState,
    WriteAheadLogEntry,
};
use crate::server::{self, GrpcTransport, RpcServer};
use std::convert::TryFrom;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use tokio::sync::mpsc;

pub struct RaftClientConfig {
    pub my_replica_id: String,
    pub cluster_members: Vec<RaftMemberInfo>,
    // A directory where we can create files to persist the log and term/vote. With `None`, state
    // lives in memory and is lost when the process exits.
    pub storage_directory: Option<PathBuf>,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftClientCreationError {
    #[error("Invalid cluster info: {0}")]
    InvalidClusterInfo(String),
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
    #[error("Storage initialization failure")]
    StorageInitialization(#[from] io::Error),
    // We will need to relax this later when adding membership changes.
    #[error("my replica ID not in cluster config")]
    MeNotInCluster,
}

/// Start a raft replica on this process: its actor, its RPC server, and connections to its
/// peers. Must be called from within a tokio runtime.
pub async fn try_create_raft_client(config: RaftClientConfig) -> Result<RaftClient, RaftClientCreationError> {
    let root_logger = config
        .info_logger
        .new(slog::o!("ReplicaId" => config.my_replica_id.clone()));

    let options = RaftOptionsValidated::try_from(config.options)
        .map_err(|e| RaftClientCreationError::IllegalClientOptions(e.to_string()))?;

    let my_member_info =
        my_info(&config.my_replica_id, &config.cluster_members).ok_or(RaftClientCreationError::MeNotInCluster)?;
    let my_server_addr = raft_rpc_server_addr(my_member_info);

    let cluster_members: Vec<ReplicaMetadata> =
        config.cluster_members.into_iter().map(ReplicaMetadata::from).collect();
    let my_replica_id = ReplicaId::new(config.my_replica_id);
    let cluster_tracker = ClusterTracker::create_valid_cluster(my_replica_id.clone(), cluster_members.clone())
        .map_err(|e| RaftClientCreationError::InvalidClusterInfo(e.to_string()))?;

    let (actor_client, actor_queue_rx) = ActorClient::new(10);
    let (server_shutdown_handle, server_shutdown_signal) = server::shutdown_signal();
    let (commit_stream_publisher, replica_commit_stream) = new_commit_stream();

    let transport = GrpcTransport::new(
        root_logger.clone(),
        cluster_members
            .iter()
            .filter(|member| *member.replica_id() != my_replica_id),
        actor_client.weak(),
        options.leader_append_entries_timeout,
    );
    let parts = ReplicaParts {
        logger: root_logger.clone(),
        cluster_tracker,
        commit_stream_publisher,
        transport,
        timers: ActorTimers::new(actor_client.weak(), options.leader_heartbeat_duration),
        options,
    };

    let election_state_change_listener = match config.storage_directory {
        None => {
            slog::info!(root_logger, "Using in-memory storage");
            start_replica(
                parts,
                InMemoryLog::create()?,
                VolatileLocalState::new(my_replica_id),
                actor_queue_rx,
            )?
        }
        Some(directory) => {
            slog::info!(root_logger, "Using storage directory {:?}", directory);
            std::fs::create_dir_all(&directory)?;
            start_replica(
                parts,
                FileLog::open(directory.join("raft_log"))?,
                DiskLocalState::open(directory.join("raft_local_state"), my_replica_id)?,
                actor_queue_rx,
            )?
        }
    };

    let replica_raft_server = RpcServer::new(root_logger.clone(), actor_client.weak());
    tokio::spawn(replica_raft_server.run(my_server_addr, server_shutdown_signal));

    Ok(RaftClient {
        replicated_log: RaftReplicatedLog::new(actor_client),
        commit_stream: RaftCommitStream::new(replica_commit_stream),
        event_listener: RaftEventListener::new(election_state_change_listener),
        server_shutdown_handle,
    })
}

/// Everything a replica needs that doesn't depend on the choice of storage.
struct ReplicaParts {
    logger: slog::Logger,
    cluster_tracker: ClusterTracker,
    commit_stream_publisher: CommitStreamPublisher,
    transport: GrpcTransport,
    timers: ActorTimers,
    options: RaftOptionsValidated,
}

/// Create the replica on top of the chosen storage and spawn its actor.
fn start_replica<L, S>(
    parts: ReplicaParts,
    log: L,
    local_state: S,
    actor_queue_rx: mpsc::Receiver<Event>,
) -> Result<ElectionStateChangeListener, io::Error>
where
    L: Log<WriteAheadLogEntry> + Send + 'static,
    S: PersistentLocalState + Send + 'static,
{
    let (replica, election_state_change_listener) = Replica::new(ReplicaConfig {
        logger: parts.logger.clone(),
        cluster_tracker: parts.cluster_tracker,
        log,
        local_state,
        commit_stream_publisher: parts.commit_stream_publisher,
        transport: Box::new(parts.transport),
        timers: Box::new(parts.timers),
        follower_min_timeout: parts.options.follower_min_timeout,
        follower_max_timeout: parts.options.follower_max_timeout,
        max_entries_per_request: parts.options.leader_max_entries_per_request,
    })?;

    let replica_actor = ReplicaActor::new(parts.logger, actor_queue_rx, replica);
    tokio::spawn(replica_actor.run_event_loop());

    Ok(election_state_change_listener)
}

fn my_info<'a>(my_replica_id: &str, cluster_members: &'a [RaftMemberInfo]) -> Option<&'a RaftMemberInfo> {
    cluster_members
        .iter()
        .find(|member_info| member_info.replica_id == my_replica_id)
}

fn raft_rpc_server_addr(member_info: &RaftMemberInfo) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(member_info.ip_addr, member_info.raft_rpc_port))
}
