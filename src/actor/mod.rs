use crate::commitlog;
use crate::replica;
use crate::replica::{HandleMessageError, RaftMessage, ReplicaId};
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

// Design choice: Disk interaction is synchronous inside the event loop. Handlers must never
// await; anything slow (RPCs, timers) runs on another task and comes back as an event.
#[derive(Debug)]
pub(crate) enum Event {
    // Leader: Write to disk, then start replicating it.
    // Candidate/Follower: Redirect or reject.
    EnqueueForReplication(
        replica::EnqueueForReplicationInput,
        Callback<replica::EnqueueForReplicationOutput, replica::EnqueueForReplicationError>,
    ),

    // Any of the four raft messages. Inbound requests carry a callback for the reply; replies
    // to our own requests come back without one.
    Message {
        from: ReplicaId,
        message: RaftMessage,
        callback: Option<Callback<Option<RaftMessage>, HandleMessageError>>,
    },

    // Leader: discard
    // Candidate/Follower: Start a new election.
    ElectionTimeout,

    // Leader: AppendEntries to every peer.
    // Candidate/Follower: discard
    HeartbeatTick(replica::HeartbeatTick),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Debug>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Debug> Callback<O, E> {
    pub(crate) fn send(self, message: Result<O, E>) {
        // Caller may have given up (e.g. RPC deadline), that's fine.
        let _ = self.0.send(message);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Replica actor has exited")]
pub(crate) struct ActorExited;

/// ActorClient keeps the actor alive. Held by the application-facing API.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// WeakActorClient doesn't keep the actor alive. Held by timers, the RPC server and the
/// transport, so the event loop can exit once the application drops its client.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn enqueue_for_replication(
        &self,
        input: replica::EnqueueForReplicationInput,
    ) -> Result<replica::EnqueueForReplicationOutput, replica::EnqueueForReplicationError> {
        let (tx, rx) = oneshot::channel();
        send(&self.sender, Event::EnqueueForReplication(input, Callback(tx)))
            .await
            .map_err(|_| replica::EnqueueForReplicationError::ActorExited)?;

        rx.await
            .unwrap_or(Err(replica::EnqueueForReplicationError::ActorExited))
    }
}

impl WeakActorClient {
    /// Inbound request from a peer. Resolves to the reply to send back, if any.
    pub(crate) async fn handle_message(
        &self,
        from: ReplicaId,
        message: RaftMessage,
    ) -> Result<Option<RaftMessage>, HandleMessageError> {
        let (tx, rx) = oneshot::channel();
        let event = Event::Message {
            from,
            message,
            callback: Some(Callback(tx)),
        };
        self.send(event).await.map_err(|_| HandleMessageError::ActorExited)?;

        rx.await.unwrap_or(Err(HandleMessageError::ActorExited))
    }

    /// A peer's reply to one of our requests.
    pub(crate) async fn notify_reply(&self, from: ReplicaId, message: RaftMessage) -> Result<(), ActorExited> {
        self.send(Event::Message {
            from,
            message,
            callback: None,
        })
        .await
    }

    pub(crate) async fn election_timeout(&self) -> Result<(), ActorExited> {
        self.send(Event::ElectionTimeout).await
    }

    pub(crate) async fn heartbeat_tick(&self, tick: replica::HeartbeatTick) -> Result<(), ActorExited> {
        self.send(Event::HeartbeatTick(tick)).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        match self.sender.upgrade() {
            Some(sender) => send(&sender, event).await,
            None => Err(ActorExited),
        }
    }
}

async fn send(sender: &mpsc::Sender<Event>, event: Event) -> Result<(), ActorExited> {
    sender.send(event).await.map_err(|_| ActorExited)
}

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<L, S>
where
    L: commitlog::Log<replica::WriteAheadLogEntry>,
    S: replica::PersistentLocalState,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: replica::Replica<L, S>,
}

impl<L, S> ReplicaActor<L, S>
where
    L: commitlog::Log<replica::WriteAheadLogEntry>,
    S: replica::PersistentLocalState,
{
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, replica: replica::Replica<L, S>) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);

            if self.replica.is_halted() {
                slog::crit!(self.logger, "Replica has halted. Event loop exiting.");
                return;
            }
        }

        slog::info!(self.logger, "All clients dropped. Event loop exiting.");
    }

    // This must NOT be async. Any long running work must be spawned on another task
    // and/or come as a callback to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::EnqueueForReplication(input, callback) => {
                let result = self.replica.handle_enqueue_for_replication(input);
                callback.send(result);
            }
            Event::Message {
                from,
                message,
                callback: Some(callback),
            } => {
                let result = self.replica.handle_message(from, message);
                callback.send(result);
            }
            Event::Message {
                from,
                message,
                callback: None,
            } => match self.replica.handle_message(from.clone(), message) {
                Ok(None) => {}
                Ok(Some(unexpected)) => {
                    slog::warn!(self.logger, "Dropping reply to a message from {:?}: {:?}", from, unexpected)
                }
                Err(e) => slog::warn!(self.logger, "Failed to handle reply from {:?}: {}", from, e),
            },
            Event::ElectionTimeout => {
                self.replica.handle_election_timeout();
            }
            Event::HeartbeatTick(tick) => {
                self.replica.handle_heartbeat_tick(tick);
            }
        }
    }
}
