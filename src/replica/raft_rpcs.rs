//! The four raft RPC message shapes exchanged between replicas.

use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::ReplicaId;
use bytes::Bytes;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum RaftMessage {
    RequestVote(RequestVote),
    RequestVoteReply(RequestVoteReply),
    AppendEntries(AppendEntries),
    AppendEntriesReply(AppendEntriesReply),
}

impl RaftMessage {
    /// Every message carries the sender's term.
    pub(crate) fn term(&self) -> Term {
        match self {
            RaftMessage::RequestVote(m) => m.term,
            RaftMessage::RequestVoteReply(m) => m.term,
            RaftMessage::AppendEntries(m) => m.term,
            RaftMessage::AppendEntriesReply(m) => m.term,
        }
    }

    /// For a request, the leader hint it carries if it's from a leader.
    pub(crate) fn leader_hint(&self) -> Option<&ReplicaId> {
        match self {
            RaftMessage::AppendEntries(m) => Some(&m.leader_id),
            _ => None,
        }
    }

    /// What we answer to a message whose term is behind ours. Requests are rejected with our
    /// term so the sender can catch up; replies are dropped.
    pub(crate) fn stale_term_rejection(&self, current_term: Term) -> Option<RaftMessage> {
        match self {
            RaftMessage::RequestVote(_) => Some(RaftMessage::RequestVoteReply(RequestVoteReply {
                term: current_term,
                vote_granted: false,
            })),
            RaftMessage::AppendEntries(m) => Some(RaftMessage::AppendEntriesReply(AppendEntriesReply {
                term: current_term,
                success: false,
                match_index: m.previous_log_entry.map(|(_, index)| index),
            })),
            RaftMessage::RequestVoteReply(_) | RaftMessage::AppendEntriesReply(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RequestVote {
    pub(crate) term: Term,
    pub(crate) candidate_id: ReplicaId,
    pub(crate) last_log_entry: Option<(Term, Index)>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RequestVoteReply {
    pub(crate) term: Term,
    pub(crate) vote_granted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AppendEntries {
    pub(crate) term: Term,
    pub(crate) leader_id: ReplicaId,
    // "Previous log entry" is the log entry immediately preceding the new ones.
    pub(crate) previous_log_entry: Option<(Term, Index)>,
    pub(crate) entries: Vec<LogEntry>,
    pub(crate) leader_commit: Option<Index>,
}

impl AppendEntries {
    /// Index of the last entry this request covers, i.e. what a follower has matched once it
    /// accepts this request.
    pub(crate) fn last_covered_index(&self) -> Option<Index> {
        match self.entries.last() {
            Some(entry) => Some(entry.index),
            None => self.previous_log_entry.map(|(_, index)| index),
        }
    }

    /// Entries must be contiguous and directly follow the previous log entry.
    pub(crate) fn has_contiguous_entries(&self) -> bool {
        let mut expected_index = match self.previous_log_entry {
            None => Some(Index::start_index()),
            Some((_, index)) => index.checked_plus(1),
        };
        for entry in self.entries.iter() {
            if Some(entry.index) != expected_index {
                return false;
            }
            expected_index = entry.index.checked_plus(1);
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LogEntry {
    pub(crate) index: Index,
    pub(crate) term: Term,
    pub(crate) data: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AppendEntriesReply {
    pub(crate) term: Term,
    pub(crate) success: bool,
    // On success: the last index the follower now matches. On rejection: the previous log index
    // of the rejected request, so the leader knows which probe failed.
    pub(crate) match_index: Option<Index>,
}
