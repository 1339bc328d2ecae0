use crate::actor::WeakActorClient;
use crate::grpc::grpc_raft_server::{GrpcRaft, GrpcRaftServer};
use crate::grpc::{ProtoAppendEntriesReply, ProtoAppendEntriesReq, ProtoRequestVoteReply, ProtoRequestVoteReq};
use crate::replica::{HandleMessageError, RaftMessage};
use crate::server::wire;
use crate::server::RpcServerShutdownSignal;
use std::net::SocketAddr;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer is the type that implements the Raft gRPC interface. It hands every inbound request
/// to the local replica's actor and waits for the reply.
pub(crate) struct RpcServer {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        RpcServer { logger, local_replica }
    }

    pub(crate) async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcRaftServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal)
            .await;

        match result {
            Ok(()) => slog::info!(logger, "Server has shut down"),
            Err(e) => slog::error!(logger, "Server exited with error: {:?}", e),
        }
    }

    async fn handle_request_vote(&self, rpc_request: ProtoRequestVoteReq) -> Result<ProtoRequestVoteReply, Status> {
        let request = wire::request_vote_from_proto(rpc_request)?;
        let from = request.candidate_id.clone();

        match self.local_replica.handle_message(from, RaftMessage::RequestVote(request)).await {
            Ok(Some(RaftMessage::RequestVoteReply(reply))) => Ok(wire::request_vote_reply_to_proto(&reply)),
            Ok(other) => Err(unexpected_reply(other)),
            Err(e) => Err(convert_handle_message_error(e)),
        }
    }

    async fn handle_append_entries(
        &self,
        rpc_request: ProtoAppendEntriesReq,
    ) -> Result<ProtoAppendEntriesReply, Status> {
        let request = wire::append_entries_from_proto(rpc_request)?;
        let from = request.leader_id.clone();

        match self
            .local_replica
            .handle_message(from, RaftMessage::AppendEntries(request))
            .await
        {
            Ok(Some(RaftMessage::AppendEntriesReply(reply))) => Ok(wire::append_entries_reply_to_proto(&reply)),
            Ok(other) => Err(unexpected_reply(other)),
            Err(e) => Err(convert_handle_message_error(e)),
        }
    }
}

fn unexpected_reply(reply: Option<RaftMessage>) -> Status {
    Status::internal(format!("Replica produced an unexpected reply: {:?}", reply))
}

fn convert_handle_message_error(error: HandleMessageError) -> Status {
    match error {
        HandleMessageError::SenderNotInCluster(_) => Status::permission_denied(error.to_string()),
        HandleMessageError::MalformedMessage(_, _) => Status::invalid_argument(error.to_string()),
        HandleMessageError::StorageFailure(_) | HandleMessageError::Halted | HandleMessageError::ActorExited => {
            Status::unavailable(error.to_string())
        }
    }
}

#[async_trait::async_trait]
impl GrpcRaft for RpcServer {
    async fn request_vote(
        &self,
        rpc_request_wrapped: Request<ProtoRequestVoteReq>,
    ) -> Result<Response<ProtoRequestVoteReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_request_vote(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn append_entries(
        &self,
        rpc_request_wrapped: Request<ProtoAppendEntriesReq>,
    ) -> Result<Response<ProtoAppendEntriesReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_append_entries(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}
