use crate::commitlog::Index;
use crate::replica::Term;
use bytes::Bytes;
use tokio::sync::mpsc;

/// One log entry that a majority has stored, handed to the application exactly once.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommittedEntry {
    pub(crate) term: Term,
    pub(crate) index: Index,
    pub(crate) data: Bytes,
}

/// Write half, owned by the commit tracker. Entries go out in index order.
pub(crate) struct CommitStreamPublisher {
    sender: mpsc::UnboundedSender<CommittedEntry>,
}

/// Read half, handed to the application through `RaftCommitStream`.
pub(crate) struct CommitStream {
    receiver: mpsc::UnboundedReceiver<CommittedEntry>,
}

// Unbounded: the actor must never block on a slow application.
pub(crate) fn new() -> (CommitStreamPublisher, CommitStream) {
    let (sender, receiver) = mpsc::unbounded_channel();

    (CommitStreamPublisher { sender }, CommitStream { receiver })
}

impl CommitStreamPublisher {
    pub(crate) fn publish(&self, logger: &slog::Logger, entry: CommittedEntry) {
        let index = entry.index;
        if self.sender.send(entry).is_err() {
            slog::warn!(logger, "Application dropped the commit stream; entry {:?} not delivered", index);
        }
    }
}

impl CommitStream {
    pub(crate) async fn recv(&mut self) -> Option<CommittedEntry> {
        self.receiver.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<CommittedEntry> {
        self.receiver.try_recv().ok()
    }
}
