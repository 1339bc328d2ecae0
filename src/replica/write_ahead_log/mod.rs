//! The replica's view of its log: generic `commitlog` storage holding raft entries (term plus
//! payload), and the stream that hands committed entries to the application.

mod commit_stream;
mod log;
mod log_entry;

pub(crate) use commit_stream::new as new_commit_stream;
pub(crate) use commit_stream::CommitStream;
pub(crate) use commit_stream::CommitStreamPublisher;
pub(crate) use commit_stream::CommittedEntry;
pub(crate) use log::WriteAheadLog;
pub(crate) use log_entry::WriteAheadLogEntry;
