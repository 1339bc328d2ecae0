mod peer_client;
mod server;
mod shutdown;
mod wire;

pub(crate) use peer_client::GrpcTransport;
pub(crate) use server::RpcServer;
pub(crate) use shutdown::shutdown_signal;
pub(crate) use shutdown::RpcServerShutdownHandle;
pub(crate) use shutdown::RpcServerShutdownSignal;
