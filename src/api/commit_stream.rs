use crate::api::RaftEntryId;
use crate::replica;
use bytes::Bytes;

/// RaftCommitStream delivers committed entries to the application, in log order, once each.
pub struct RaftCommitStream {
    inner: replica::CommitStream,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaftCommittedEntry {
    pub entry_id: RaftEntryId,
    pub data: Bytes,
}

impl RaftCommitStream {
    pub(crate) fn new(inner: replica::CommitStream) -> Self {
        RaftCommitStream { inner }
    }

    /// `next()` returns the next committed entry to be applied to your application's state
    /// machine, or `None` once the local replica has exited.
    ///
    /// A replica process starts with nothing committed, so after a restart entries are delivered
    /// again from the start of the log.
    pub async fn next(&mut self) -> Option<RaftCommittedEntry> {
        self.inner.recv().await.map(RaftCommittedEntry::from)
    }
}

impl From<replica::CommittedEntry> for RaftCommittedEntry {
    fn from(internal_entry: replica::CommittedEntry) -> Self {
        RaftCommittedEntry {
            entry_id: RaftEntryId {
                term: internal_entry.term,
                entry_index: internal_entry.index,
            },
            data: internal_entry.data,
        }
    }
}
