use crate::commitlog::{Index, Log};
use crate::replica::write_ahead_log::{CommitStreamPublisher, CommittedEntry, WriteAheadLog, WriteAheadLogEntry};
use crate::replica::Term;
use bytes::Bytes;
use std::io;

/// CommitTracker owns the replica's volatile commit state and is the only thing that publishes
/// to the application's commit stream.
///
/// `last_applied <= commit_index` always holds, and neither ever moves backwards.
pub(crate) struct CommitTracker {
    logger: slog::Logger,
    commit_stream_publisher: CommitStreamPublisher,
    commit_index: Option<Index>,
    last_applied_index: Option<Index>,
}

impl CommitTracker {
    pub(crate) fn new(logger: slog::Logger, commit_stream_publisher: CommitStreamPublisher) -> Self {
        CommitTracker {
            logger,
            commit_stream_publisher,
            commit_index: None,
            last_applied_index: None,
        }
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_index
    }

    #[cfg(test)]
    pub(crate) fn last_applied_index(&self) -> Option<Index> {
        self.last_applied_index
    }

    /// Highest index that a strict majority of the cluster has replicated. `matched_indexes` must
    /// contain one value per voting member, the leader's own latest index included.
    pub(crate) fn quorum_matched_index(mut matched_indexes: Vec<Option<Index>>) -> Option<Index> {
        if matched_indexes.is_empty() {
            return None;
        }

        // Descending, so everything at or left of `quorum_idx` is >= the value at `quorum_idx`,
        // and that's exactly `majority` values.
        matched_indexes.sort_by(|a, b| b.cmp(a));
        let majority = (matched_indexes.len() / 2) + 1;
        let quorum_idx = majority - 1;

        matched_indexes[quorum_idx]
    }

    /// Advance the commit index on a follower after a successful AppendEntries. Never decreases.
    ///
    /// Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index(&mut self, new_commit_index: Index) -> bool {
        if Some(new_commit_index) > self.commit_index {
            slog::debug!(
                self.logger,
                "Commit index {:?} -> {:?}",
                self.commit_index,
                new_commit_index
            );
            self.commit_index = Some(new_commit_index);
            true
        } else {
            false
        }
    }

    /// Leader side: a majority having an entry is only enough to commit it when the entry is from
    /// our own term. Earlier entries get committed indirectly once a current term entry is.
    ///
    /// Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_current_term<L>(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
        log: &WriteAheadLog<L>,
    ) -> Result<bool, io::Error>
    where
        L: Log<WriteAheadLogEntry>,
    {
        if Some(tentative_new_commit_index) <= self.commit_index {
            return Ok(false);
        }

        let entry = log.read_required(tentative_new_commit_index)?;
        if entry.term != current_term {
            slog::debug!(
                self.logger,
                "Not committing index {:?} from term {:?} while in term {:?}",
                tentative_new_commit_index,
                entry.term,
                current_term
            );
            return Ok(false);
        }

        Ok(self.ratchet_fwd_commit_index(tentative_new_commit_index))
    }

    /// Publish every committed-but-unapplied entry, in index order.
    pub(crate) fn apply_all_committed_entries<L>(&mut self, log: &WriteAheadLog<L>) -> Result<(), io::Error>
    where
        L: Log<WriteAheadLogEntry>,
    {
        let commit_index = match self.commit_index {
            Some(ci) => ci,
            None => return Ok(()),
        };

        let mut next_to_apply = self
            .last_applied_index
            .map(|i| i.plus(1))
            .unwrap_or_else(Index::start_index);

        while next_to_apply <= commit_index {
            let entry = log.read_required(next_to_apply)?;
            self.commit_stream_publisher.publish(
                &self.logger,
                CommittedEntry {
                    term: entry.term,
                    index: next_to_apply,
                    data: Bytes::from(entry.data),
                },
            );
            self.last_applied_index = Some(next_to_apply);
            next_to_apply = next_to_apply.plus(1);
        }

        Ok(())
    }
}
