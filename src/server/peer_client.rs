use crate::actor::WeakActorClient;
use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::replica::{RaftMessage, RaftTransport, ReplicaId, ReplicaMetadata};
use crate::server::wire;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

/// GrpcTransport sends raft requests to peers over gRPC. Each call runs on its own task and the
/// peer's reply is fed back to the local replica's actor as a new message. Failed or timed out
/// calls are logged and dropped; the replica's timers take care of retrying.
pub(crate) struct GrpcTransport {
    logger: slog::Logger,
    peers: HashMap<ReplicaId, PeerClient>,
    actor_client: WeakActorClient,
    rpc_timeout: Duration,
}

impl GrpcTransport {
    pub(crate) fn new<'a>(
        logger: slog::Logger,
        peers: impl Iterator<Item = &'a ReplicaMetadata>,
        actor_client: WeakActorClient,
        rpc_timeout: Duration,
    ) -> Self {
        let peers = peers
            .map(|metadata| (metadata.replica_id().clone(), PeerClient::new(metadata)))
            .collect();

        GrpcTransport {
            logger,
            peers,
            actor_client,
            rpc_timeout,
        }
    }
}

impl RaftTransport for GrpcTransport {
    fn send(&self, to: &ReplicaId, message: RaftMessage) {
        let peer_client = match self.peers.get(to) {
            Some(peer_client) => peer_client.clone(),
            None => {
                slog::error!(self.logger, "Dropping message to unknown peer {:?}: {:?}", to, message);
                return;
            }
        };

        if let RaftMessage::RequestVoteReply(_) | RaftMessage::AppendEntriesReply(_) = message {
            slog::error!(self.logger, "Replies go back on the inbound RPC, dropping {:?}", message);
            return;
        }

        let logger = self.logger.new(slog::o!("Peer" => to.to_string()));
        tokio::task::spawn(call_peer(
            logger,
            peer_client,
            message,
            self.rpc_timeout,
            self.actor_client.clone(),
        ));
    }
}

async fn call_peer(
    logger: slog::Logger,
    peer_client: PeerClient,
    message: RaftMessage,
    rpc_timeout: Duration,
    callback: WeakActorClient,
) {
    let rpc_reply = tokio::time::timeout(rpc_timeout, peer_client.call(&logger, message)).await;

    let reply = match rpc_reply {
        Ok(Ok(reply)) => reply,
        Ok(Err(rpc_status)) => {
            slog::debug!(logger, "RPC to peer failed: {:?}", rpc_status);
            peer_client.disconnect().await;
            return;
        }
        Err(_timeout) => {
            slog::debug!(logger, "Timed out calling peer");
            return;
        }
    };

    if callback.notify_reply(peer_client.peer_id.clone(), reply).await.is_err() {
        slog::debug!(logger, "Replica has exited, dropping peer reply");
    }
}

/// A lazily connected client for a single peer. Clones share the connection.
#[derive(Clone)]
struct PeerClient {
    peer_id: ReplicaId,
    url: String,
    connection: Arc<Mutex<Option<GrpcRaftClient<Channel>>>>,
}

impl PeerClient {
    fn new(metadata: &ReplicaMetadata) -> Self {
        PeerClient {
            peer_id: metadata.replica_id().clone(),
            url: format!("http://{}:{}", metadata.ip_addr(), metadata.port()),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    async fn call(&self, logger: &slog::Logger, message: RaftMessage) -> Result<RaftMessage, Status> {
        let mut client = self.connected_client().await?;

        slog::debug!(logger, "ClientWire - {:?}", message);
        let reply = match message {
            RaftMessage::RequestVote(request) => {
                let rpc_reply = client.request_vote(wire::request_vote_to_proto(&request)).await?;
                RaftMessage::RequestVoteReply(wire::request_vote_reply_from_proto(rpc_reply.into_inner()))
            }
            RaftMessage::AppendEntries(request) => {
                let rpc_reply = client.append_entries(wire::append_entries_to_proto(&request)).await?;
                RaftMessage::AppendEntriesReply(wire::append_entries_reply_from_proto(rpc_reply.into_inner()))
            }
            RaftMessage::RequestVoteReply(_) | RaftMessage::AppendEntriesReply(_) => {
                return Err(Status::internal("Replies can't be sent as requests"));
            }
        };
        slog::debug!(logger, "ClientWire - {:?}", reply);

        Ok(reply)
    }

    async fn connected_client(&self) -> Result<GrpcRaftClient<Channel>, Status> {
        let mut connection = self.connection.lock().await;
        if let Some(client) = connection.as_ref() {
            return Ok(client.clone());
        }

        let endpoint = Endpoint::from_shared(self.url.clone())
            .map_err(|e| Status::invalid_argument(format!("Bad peer URL {}: {}", self.url, e)))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Status::unavailable(format!("Failed to connect to {}: {}", self.url, e)))?;

        let client = GrpcRaftClient::new(channel);
        *connection = Some(client.clone());
        Ok(client)
    }

    /// Forget the connection so the next call reconnects.
    async fn disconnect(&self) {
        self.connection.lock().await.take();
    }
}
