//! Conversions between the raft messages and their protobuf form. Index 0 and term 0 stand for
//! "no entry" on the wire.

use crate::commitlog::Index;
use crate::grpc::{
    ProtoAppendEntriesReply, ProtoAppendEntriesReq, ProtoLogEntry, ProtoRequestVoteReply, ProtoRequestVoteReq,
};
use crate::replica::{
    AppendEntries, AppendEntriesReply, LogEntry, ReplicaId, RequestVote, RequestVoteReply, Term,
};
use bytes::Bytes;
use tonic::Status;

pub(crate) fn request_vote_to_proto(request: &RequestVote) -> ProtoRequestVoteReq {
    let (last_log_entry_term, last_log_entry_index) = log_entry_metadata_to_proto(request.last_log_entry);

    ProtoRequestVoteReq {
        candidate_id: request.candidate_id.as_str().to_string(),
        term: request.term.as_u64(),
        last_log_entry_index,
        last_log_entry_term,
    }
}

pub(crate) fn request_vote_from_proto(rpc_request: ProtoRequestVoteReq) -> Result<RequestVote, Status> {
    let last_log_entry =
        convert_log_entry_metadata(rpc_request.last_log_entry_term, rpc_request.last_log_entry_index)?;

    Ok(RequestVote {
        term: convert_request_term(rpc_request.term)?,
        candidate_id: convert_replica_id(rpc_request.candidate_id)?,
        last_log_entry,
    })
}

pub(crate) fn request_vote_reply_to_proto(reply: &RequestVoteReply) -> ProtoRequestVoteReply {
    ProtoRequestVoteReply {
        term: reply.term.as_u64(),
        vote_granted: reply.vote_granted,
    }
}

pub(crate) fn request_vote_reply_from_proto(rpc_reply: ProtoRequestVoteReply) -> RequestVoteReply {
    RequestVoteReply {
        term: Term::new(rpc_reply.term),
        vote_granted: rpc_reply.vote_granted,
    }
}

pub(crate) fn append_entries_to_proto(request: &AppendEntries) -> ProtoAppendEntriesReq {
    let (previous_log_entry_term, previous_log_entry_index) =
        log_entry_metadata_to_proto(request.previous_log_entry);

    ProtoAppendEntriesReq {
        leader_id: request.leader_id.as_str().to_string(),
        term: request.term.as_u64(),
        previous_log_entry_index,
        previous_log_entry_term,
        new_entries: request
            .entries
            .iter()
            .map(|entry| ProtoLogEntry {
                index: entry.index.as_u64(),
                term: entry.term.as_u64(),
                data: entry.data.to_vec(),
            })
            .collect(),
        commit_index: index_to_proto(request.leader_commit),
    }
}

pub(crate) fn append_entries_from_proto(rpc_request: ProtoAppendEntriesReq) -> Result<AppendEntries, Status> {
    let previous_log_entry = convert_log_entry_metadata(
        rpc_request.previous_log_entry_term,
        rpc_request.previous_log_entry_index,
    )?;

    let mut entries = Vec::with_capacity(rpc_request.new_entries.len());
    for proto_entry in rpc_request.new_entries {
        let (term, index) = convert_log_entry_metadata(proto_entry.term, proto_entry.index)?
            .ok_or_else(|| Status::invalid_argument("Log entry with index 0 and term 0"))?;
        entries.push(LogEntry {
            index,
            term,
            data: Bytes::from(proto_entry.data),
        });
    }

    Ok(AppendEntries {
        term: convert_request_term(rpc_request.term)?,
        leader_id: convert_replica_id(rpc_request.leader_id)?,
        previous_log_entry,
        entries,
        leader_commit: Index::from_u64_or_none(rpc_request.commit_index),
    })
}

pub(crate) fn append_entries_reply_to_proto(reply: &AppendEntriesReply) -> ProtoAppendEntriesReply {
    ProtoAppendEntriesReply {
        term: reply.term.as_u64(),
        success: reply.success,
        match_index: index_to_proto(reply.match_index),
    }
}

pub(crate) fn append_entries_reply_from_proto(rpc_reply: ProtoAppendEntriesReply) -> AppendEntriesReply {
    AppendEntriesReply {
        term: Term::new(rpc_reply.term),
        success: rpc_reply.success,
        match_index: Index::from_u64_or_none(rpc_reply.match_index),
    }
}

fn log_entry_metadata_to_proto(log_entry: Option<(Term, Index)>) -> (u64, u64) {
    match log_entry {
        None => (0, 0),
        Some((term, index)) => (term.as_u64(), index.as_u64()),
    }
}

fn index_to_proto(index: Option<Index>) -> u64 {
    index.map(|i| i.as_u64()).unwrap_or(0)
}

fn convert_log_entry_metadata(log_entry_term: u64, log_entry_index: u64) -> Result<Option<(Term, Index)>, Status> {
    match (log_entry_term, log_entry_index) {
        (0, 0) => Ok(None),
        (0, _) => Err(Status::invalid_argument("Log entry term 0 and index non-0")),
        (_, 0) => Err(Status::invalid_argument("Log entry index 0 and term non-0")),
        (term, index) => Ok(Some((Term::new(term), Index::new(index)))),
    }
}

// Requests are only ever sent by candidates and leaders, who are at least in term 1.
fn convert_request_term(term: u64) -> Result<Term, Status> {
    match term {
        0 => Err(Status::invalid_argument("Request term 0")),
        term => Ok(Term::new(term)),
    }
}

fn convert_replica_id(replica_id: String) -> Result<ReplicaId, Status> {
    if replica_id.is_empty() {
        return Err(Status::invalid_argument("Empty replica ID"));
    }
    Ok(ReplicaId::new(replica_id))
}
