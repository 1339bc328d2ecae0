use crate::commitlog::{Index, Log};
use crate::replica::commit_tracker::CommitTracker;
use crate::replica::election::{
    ElectionConfig, ElectionState, ElectionStateChangeListener, ReplicaTimers,
};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::peers::{ClusterTracker, ReplicaId};
use crate::replica::raft_rpcs::{
    AppendEntries, AppendEntriesReply, LogEntry, RaftMessage, RequestVote, RequestVoteReply,
};
use crate::replica::replica_api::{
    EnqueueForReplicationError, EnqueueForReplicationInput, EnqueueForReplicationOutput, HandleMessageError,
    HeartbeatTick, LeaderRedirectInfo,
};
use crate::replica::transport::RaftTransport;
use crate::replica::write_ahead_log::{CommitStreamPublisher, WriteAheadLog, WriteAheadLogEntry};
use bytes::Bytes;
use std::{cmp, io};
use tokio::time::Duration;

pub(crate) struct ReplicaConfig<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    pub logger: slog::Logger,
    pub cluster_tracker: ClusterTracker,
    pub log: L,
    pub local_state: S,
    pub commit_stream_publisher: CommitStreamPublisher,
    pub transport: Box<dyn RaftTransport>,
    pub timers: Box<dyn ReplicaTimers>,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
    pub max_entries_per_request: usize,
}

/// Replica is the raft state machine of a single cluster member. It's driven one event at a time
/// by the actor and never blocks: outbound messages go to the transport, and their replies come
/// back later as new calls to `handle_message()`.
///
/// A failure of the durable stores halts the replica. Once halted, it refuses to do anything
/// else, since continuing could break promises it already made to peers.
pub(crate) struct Replica<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    cluster_tracker: ClusterTracker,
    local_state: S,
    election_state: ElectionState,
    wal: WriteAheadLog<L>,
    commit_tracker: CommitTracker,
    transport: Box<dyn RaftTransport>,
    max_entries_per_request: usize,
    halted: bool,
}

enum MessageFailure {
    Malformed(&'static str),
    Storage(io::Error),
}

impl From<io::Error> for MessageFailure {
    fn from(e: io::Error) -> Self {
        MessageFailure::Storage(e)
    }
}

impl<L, S> Replica<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    pub(crate) fn new(config: ReplicaConfig<L, S>) -> Result<(Self, ElectionStateChangeListener), io::Error> {
        let my_replica_id = config.cluster_tracker.my_replica_id().clone();
        let wal = WriteAheadLog::new(config.log)?;
        let (election_state, listener) = ElectionState::new_follower(
            ElectionConfig {
                my_replica_id: my_replica_id.clone(),
                follower_min_timeout: config.follower_min_timeout,
                follower_max_timeout: config.follower_max_timeout,
            },
            config.timers,
        );
        let commit_tracker = CommitTracker::new(config.logger.clone(), config.commit_stream_publisher);

        slog::info!(
            config.logger,
            "Starting replica at term {:?} with latest log entry {:?}",
            config.local_state.current_term(),
            wal.latest_entry()
        );

        let replica = Replica {
            logger: config.logger,
            my_replica_id,
            cluster_tracker: config.cluster_tracker,
            local_state: config.local_state,
            election_state,
            wal,
            commit_tracker,
            transport: config.transport,
            max_entries_per_request: config.max_entries_per_request,
            halted: false,
        };

        Ok((replica, listener))
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted
    }

    fn halt(&mut self, error: &io::Error) {
        slog::crit!(self.logger, "Durable storage failure, halting replica: {:?}", error);
        self.halted = true;
    }

    pub(crate) fn handle_enqueue_for_replication(
        &mut self,
        input: EnqueueForReplicationInput,
    ) -> Result<EnqueueForReplicationOutput, EnqueueForReplicationError> {
        if self.halted {
            return Err(EnqueueForReplicationError::LocalIoError(halted_error()));
        }

        if !self.election_state.is_leader() {
            return Err(match self.election_state.known_leader() {
                Some(leader) => EnqueueForReplicationError::LeaderRedirect(leader.clone()),
                None => EnqueueForReplicationError::NoLeader,
            });
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let term = self.local_state.current_term();
        match self.try_enqueue(term, input.data) {
            Ok(index) => Ok(EnqueueForReplicationOutput {
                enqueued_term: term,
                enqueued_index: index,
            }),
            Err(e) => {
                self.halt(&e);
                Err(EnqueueForReplicationError::LocalIoError(e))
            }
        }
    }

    fn try_enqueue(&mut self, term: Term, data: Bytes) -> Result<Index, io::Error> {
        let appended_index = self.wal.append(WriteAheadLogEntry {
            term,
            data: data.to_vec(),
        })?;
        slog::debug!(self.logger, "Appended entry {:?} in term {:?}", appended_index, term);

        // Only matters for a single member cluster, where we are the majority.
        self.try_advance_leader_commit_index()?;
        self.broadcast_append_entries()?;

        Ok(appended_index)
    }

    /// Handles an inbound message from `from`. Requests produce a reply for the caller to send
    /// back; replies produce nothing.
    pub(crate) fn handle_message(
        &mut self,
        from: ReplicaId,
        message: RaftMessage,
    ) -> Result<Option<RaftMessage>, HandleMessageError> {
        if self.halted {
            return Err(HandleMessageError::Halted);
        }
        if !self.cluster_tracker.contains_member(&from) {
            return Err(HandleMessageError::SenderNotInCluster(from));
        }
        if from == self.my_replica_id {
            return Err(HandleMessageError::MalformedMessage(from, "Message claims to be from myself"));
        }

        match self.try_handle_message(&from, message) {
            Ok(reply) => Ok(reply),
            Err(MessageFailure::Malformed(reason)) => {
                slog::warn!(self.logger, "Malformed message from {:?}: {}", from, reason);
                Err(HandleMessageError::MalformedMessage(from, reason))
            }
            Err(MessageFailure::Storage(e)) => {
                self.halt(&e);
                Err(HandleMessageError::StorageFailure(e))
            }
        }
    }

    fn try_handle_message(
        &mut self,
        from: &ReplicaId,
        message: RaftMessage,
    ) -> Result<Option<RaftMessage>, MessageFailure> {
        match &message {
            RaftMessage::RequestVote(rv) if rv.candidate_id != *from => {
                return Err(MessageFailure::Malformed("Candidate ID differs from sender"));
            }
            RaftMessage::AppendEntries(ae) if ae.leader_id != *from => {
                return Err(MessageFailure::Malformed("Leader ID differs from sender"));
            }
            RaftMessage::AppendEntries(ae) if !ae.has_contiguous_entries() => {
                return Err(MessageFailure::Malformed("Entries don't directly follow the previous entry"));
            }
            _ => {}
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        let current_term = self.local_state.current_term();
        let message_term = message.term();
        if message_term < current_term {
            slog::debug!(
                self.logger,
                "Message from {:?} has stale term {:?}, current term {:?}",
                from,
                message_term,
                current_term
            );
            return Ok(message.stale_term_rejection(current_term));
        }
        if message_term > current_term {
            self.observe_newer_term(message_term, message.leader_hint().is_some())?;
        }

        match message {
            RaftMessage::RequestVote(rv) => Ok(Some(RaftMessage::RequestVoteReply(self.handle_request_vote(rv)?))),
            RaftMessage::RequestVoteReply(reply) => {
                self.handle_request_vote_reply(from, reply)?;
                Ok(None)
            }
            RaftMessage::AppendEntries(ae) => {
                Ok(Some(RaftMessage::AppendEntriesReply(self.handle_append_entries(ae)?)))
            }
            RaftMessage::AppendEntriesReply(reply) => {
                self.handle_append_entries_reply(from, reply)?;
                Ok(None)
            }
        }
    }

    fn observe_newer_term(&mut self, new_term: Term, from_leader: bool) -> Result<(), io::Error> {
        if self.local_state.store_term_if_increased(new_term)? {
            slog::info!(
                self.logger,
                "Observed newer term {:?} (from leader: {}). Stepping down to follower. Was: {:?}",
                new_term,
                from_leader,
                self.election_state
            );
            // The AppendEntries handler records the leader right after.
            self.election_state.step_down_for_newer_term();
        }
        Ok(())
    }

    fn handle_request_vote(&mut self, request: RequestVote) -> Result<RequestVoteReply, MessageFailure> {
        // Term is equal to ours at this point.
        let (current_term, opt_voted_for) = self.local_state.voted_for_current_term();
        let reject = RequestVoteReply {
            term: current_term,
            vote_granted: false,
        };

        // > If votedFor is null or candidateId, and candidate’s log is at
        // > least as up-to-date as receiver’s log, grant vote (§5.2, §5.4)
        if let Some(voted_for) = &opt_voted_for {
            if **voted_for != request.candidate_id {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                return Ok(reject);
            }
        }

        if !self.is_candidate_log_gte_mine(request.last_log_entry) {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}. Candidate log {:?} is behind ours {:?}.",
                request.candidate_id,
                request.last_log_entry,
                self.wal.latest_entry()
            );
            return Ok(reject);
        }

        if opt_voted_for.is_none()
            && !self
                .local_state
                .store_vote_for_term_if_unvoted(current_term, request.candidate_id.clone())?
        {
            slog::warn!(self.logger, "Lost race to store vote for term {:?}", current_term);
            return Ok(reject);
        }

        slog::info!(self.logger, "Voting for {:?} in term {:?}.", request.candidate_id, current_term);
        self.election_state.reset_timeout_if_follower();

        Ok(RequestVoteReply {
            term: current_term,
            vote_granted: true,
        })
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_entry: Option<(Term, Index)>) -> bool {
        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        match (self.wal.latest_entry(), candidate_last_entry) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((my_term, my_index)), Some((candidate_term, candidate_index))) => {
                if candidate_term != my_term {
                    candidate_term > my_term
                } else {
                    candidate_index >= my_index
                }
            }
        }
    }

    fn handle_request_vote_reply(&mut self, from: &ReplicaId, reply: RequestVoteReply) -> Result<(), io::Error> {
        if !reply.vote_granted {
            slog::info!(self.logger, "Vote not granted from {:?} for term {:?}", from, reply.term);
            return Ok(());
        }

        let num_votes_received = match self.election_state.add_vote_if_candidate(from.clone()) {
            Some(v) => v,
            None => {
                slog::debug!(
                    self.logger,
                    "Received vote for term {:?} but no longer candidate: {:?}",
                    reply.term,
                    self.election_state,
                );
                return Ok(());
            }
        };

        slog::info!(
            self.logger,
            "Received {}/{} votes for term {:?}",
            num_votes_received,
            self.cluster_tracker.num_voting_replicas(),
            reply.term,
        );

        if num_votes_received >= self.cluster_tracker.majority() {
            self.become_leader()?;
        }
        Ok(())
    }

    fn become_leader(&mut self) -> Result<(), io::Error> {
        let term = self.local_state.current_term();
        let peer_ids = self.sorted_peer_ids();
        let latest_index = self.wal.latest_index();
        self.election_state.transition_to_leader(term, peer_ids, latest_index);
        slog::info!(self.logger, "Became leader for term {:?}", term);

        // Assert leadership right away.
        self.broadcast_append_entries()
    }

    fn handle_append_entries(&mut self, request: AppendEntries) -> Result<AppendEntriesReply, MessageFailure> {
        // Term is equal to ours at this point.
        let current_term = self.local_state.current_term();
        let reject = AppendEntriesReply {
            term: current_term,
            success: false,
            match_index: request.previous_log_entry.map(|(_, index)| index),
        };

        if self.election_state.is_leader() {
            slog::error!(
                self.logger,
                "Received AppendEntries from {:?} while I'm leader of the same term {:?}",
                request.leader_id,
                current_term
            );
            return Ok(reject);
        }

        let leader_info = match self.cluster_tracker.metadata(&request.leader_id) {
            Some(metadata) => LeaderRedirectInfo::from(metadata),
            None => return Err(MessageFailure::Malformed("Leader is not a cluster member")),
        };
        if self.election_state.is_candidate() {
            slog::info!(self.logger, "Discovered leader {:?} for my term, stepping down", request.leader_id);
            self.election_state.transition_to_follower(Some(leader_info));
        } else {
            self.election_state.set_leader_if_unknown(&leader_info);
        }
        self.election_state.reset_timeout_if_follower();

        // > Reply false if log doesn’t contain an entry at prevLogIndex
        // > whose term matches prevLogTerm (§5.3)
        if let Some((previous_term, previous_index)) = request.previous_log_entry {
            match self.wal.read(previous_index)? {
                Some(entry) if entry.term == previous_term => {}
                _ => {
                    slog::debug!(
                        self.logger,
                        "Missing previous entry ({:?}, {:?})",
                        previous_term,
                        previous_index
                    );
                    return Ok(reject);
                }
            }
        }

        let last_new_entry_index = request.last_covered_index();
        let leader_commit = request.leader_commit;

        // > If an existing entry conflicts with a new one (same index
        // > but different terms), delete the existing entry and all that
        // > follow it (§5.3)
        // > Append any new entries not already in the log
        for new_entry in request.entries {
            match self.wal.read(new_entry.index)? {
                Some(existing_entry) if existing_entry.term == new_entry.term => continue,
                Some(_) => {
                    assert!(
                        Some(new_entry.index) > self.commit_tracker.commit_index(),
                        "Leader asked to overwrite committed index {:?}; commit index is {:?}",
                        new_entry.index,
                        self.commit_tracker.commit_index()
                    );
                    slog::info!(self.logger, "Truncating conflicting log suffix from {:?}", new_entry.index);
                    self.wal.truncate(new_entry.index)?;
                }
                None => {}
            }

            let appended_index = self.wal.append(WriteAheadLogEntry {
                term: new_entry.term,
                data: new_entry.data.to_vec(),
            })?;
            assert_eq!(appended_index, new_entry.index, "Appended log entry to unexpected index.");
        }

        // > If leaderCommit > commitIndex, set commitIndex =
        // > min(leaderCommit, index of last new entry)
        if let (Some(leader_commit), Some(last_new_entry_index)) = (leader_commit, last_new_entry_index) {
            let new_commit_index = cmp::min(leader_commit, last_new_entry_index);
            if self.commit_tracker.ratchet_fwd_commit_index(new_commit_index) {
                self.commit_tracker.apply_all_committed_entries(&self.wal)?;
            }
        }

        Ok(AppendEntriesReply {
            term: current_term,
            success: true,
            match_index: last_new_entry_index,
        })
    }

    fn handle_append_entries_reply(&mut self, from: &ReplicaId, reply: AppendEntriesReply) -> Result<(), io::Error> {
        let logger = self.logger.new(slog::o!("Peer" => from.to_string()));
        let latest_index = self.wal.latest_index();

        let peer_state = match self
            .election_state
            .leader_state_mut()
            .and_then(|leader_state| leader_state.peer_state_mut(from))
        {
            Some(peer_state) => peer_state,
            None => {
                slog::debug!(logger, "Dropping AppendEntries reply, no longer leader");
                return Ok(());
            }
        };

        let send_more = if reply.success {
            if reply.match_index > latest_index {
                slog::warn!(
                    logger,
                    "Peer claims to match {:?} but my log ends at {:?}",
                    reply.match_index,
                    latest_index
                );
                return Ok(());
            }
            // > If last log index ≥ nextIndex for a follower: send
            // > AppendEntries RPC with log entries starting at nextIndex
            peer_state.handle_success(reply.match_index) && latest_index >= Some(peer_state.next())
        } else {
            // > If AppendEntries fails because of log inconsistency:
            // > decrement nextIndex and retry (§5.3)
            peer_state.handle_rejection(&logger, reply.match_index)
        };

        if reply.success {
            self.try_advance_leader_commit_index()?;
        }
        if send_more {
            self.send_append_entries(from)?;
        }
        Ok(())
    }

    /// > If there exists an N such that N > commitIndex, a majority
    /// > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
    /// > set commitIndex = N (§5.3, §5.4).
    fn try_advance_leader_commit_index(&mut self) -> Result<(), io::Error> {
        let mut matched_indexes: Vec<Option<Index>> = match self.election_state.leader_state() {
            Some(leader_state) => leader_state.matched_indexes().collect(),
            None => return Ok(()),
        };
        matched_indexes.push(self.wal.latest_index());

        if let Some(tentative_new_commit_index) = CommitTracker::quorum_matched_index(matched_indexes) {
            let current_term = self.local_state.current_term();
            if self.commit_tracker.ratchet_fwd_commit_index_if_current_term(
                tentative_new_commit_index,
                current_term,
                &self.wal,
            )? {
                self.commit_tracker.apply_all_committed_entries(&self.wal)?;
            }
        }
        Ok(())
    }

    pub(crate) fn handle_heartbeat_tick(&mut self, tick: HeartbeatTick) {
        if self.halted {
            return;
        }

        let current_term = self.local_state.current_term();
        if tick.term != current_term || !self.election_state.is_leader() {
            slog::debug!(
                self.logger,
                "Ignoring heartbeat tick for term {:?}, current term {:?}: {:?}",
                tick.term,
                current_term,
                self.election_state
            );
            return;
        }

        if let Err(e) = self.broadcast_append_entries() {
            self.halt(&e);
        }
    }

    fn broadcast_append_entries(&mut self) -> Result<(), io::Error> {
        let peer_ids = match self.election_state.leader_state() {
            Some(leader_state) => leader_state.peer_ids(),
            None => return Ok(()),
        };
        for peer_id in peer_ids.iter() {
            self.send_append_entries(peer_id)?;
        }
        self.election_state.reset_heartbeat_timer_if_leader();
        Ok(())
    }

    fn send_append_entries(&self, peer_id: &ReplicaId) -> Result<(), io::Error> {
        if let Some(request) = self.new_append_entries_request(peer_id)? {
            self.transport.send(peer_id, RaftMessage::AppendEntries(request));
        }
        Ok(())
    }

    fn new_append_entries_request(&self, peer_id: &ReplicaId) -> Result<Option<AppendEntries>, io::Error> {
        let peer_state = match self
            .election_state
            .leader_state()
            .and_then(|leader_state| leader_state.peer_state(peer_id))
        {
            Some(peer_state) => peer_state,
            None => return Ok(None),
        };

        let previous_log_entry = match peer_state.previous_index() {
            None => None,
            Some(previous_index) => Some((self.wal.read_required(previous_index)?.term, previous_index)),
        };

        let latest_index = self.wal.latest_index();
        let mut entries = Vec::new();
        let mut next_index = peer_state.next();
        while Some(next_index) <= latest_index && entries.len() < self.max_entries_per_request {
            let entry = self.wal.read_required(next_index)?;
            entries.push(LogEntry {
                index: next_index,
                term: entry.term,
                data: Bytes::from(entry.data),
            });
            next_index = next_index.plus(1);
        }

        Ok(Some(AppendEntries {
            term: self.local_state.current_term(),
            leader_id: self.my_replica_id.clone(),
            previous_log_entry,
            entries,
            leader_commit: self.commit_tracker.commit_index(),
        }))
    }

    pub(crate) fn handle_election_timeout(&mut self) {
        if self.halted {
            return;
        }
        if self.election_state.is_leader() {
            slog::debug!(self.logger, "Ignoring election timeout as leader");
            return;
        }

        if let Err(e) = self.start_election() {
            self.halt(&e);
        }
    }

    fn start_election(&mut self) -> Result<(), io::Error> {
        // Write-ahead: vote for self durably before telling anyone.
        let new_term = self.local_state.increment_term_and_vote_for_self()?;
        self.election_state.transition_to_candidate_and_vote_for_self();
        slog::info!(
            self.logger,
            "Election timeout. Starting election for term {:?}. Election state: {:?}",
            new_term,
            self.election_state,
        );

        if self.cluster_tracker.majority() <= 1 {
            return self.become_leader();
        }

        let request = RequestVote {
            term: new_term,
            candidate_id: self.my_replica_id.clone(),
            last_log_entry: self.wal.latest_entry(),
        };
        for peer_id in self.sorted_peer_ids() {
            self.transport.send(&peer_id, RaftMessage::RequestVote(request.clone()));
        }
        Ok(())
    }

    fn sorted_peer_ids(&self) -> Vec<ReplicaId> {
        let mut peer_ids: Vec<ReplicaId> = self.cluster_tracker.peer_ids().into_iter().collect();
        peer_ids.sort();
        peer_ids
    }
}

fn halted_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "Replica halted after a durable storage failure")
}

#[cfg(test)]
impl<L, S> Replica<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    pub(crate) fn current_term(&self) -> Term {
        self.local_state.current_term()
    }

    pub(crate) fn voted_for(&self) -> Option<ReplicaId> {
        self.local_state
            .voted_for_current_term()
            .1
            .map(|voted_for| voted_for.as_ref().clone())
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_tracker.commit_index()
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.election_state.is_leader()
    }

    pub(crate) fn peer_next_index(&self, peer_id: &ReplicaId) -> Option<Index> {
        self.election_state
            .leader_state()
            .and_then(|leader_state| leader_state.peer_state(peer_id))
            .map(|peer_state| peer_state.next())
    }

    /// The whole log as `(term, data)` pairs.
    pub(crate) fn log_entries(&self) -> Vec<(Term, Vec<u8>)> {
        let mut entries = Vec::new();
        let mut index = Index::start_index();
        while Some(index) <= self.wal.latest_index() {
            let entry = self.wal.read_required(index).unwrap();
            entries.push((entry.term, entry.data));
            index = index.plus(1);
        }
        entries
    }

    /// Simulates a crash: everything volatile is dropped, the durable stores are returned.
    pub(crate) fn into_storage(self) -> (L, S) {
        (self.wal.into_inner(), self.local_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::InMemoryLog;
    use crate::replica::election::{ElectionTimer, HeartbeatTimer};
    use crate::replica::local_state::VolatileLocalState;
    use crate::replica::peers::ReplicaMetadata;
    use crate::replica::test_utils::ManualTimers;
    use crate::replica::write_ahead_log::new_commit_stream;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    /// Works until told to fail.
    struct FlakyLog {
        inner: InMemoryLog<WriteAheadLogEntry>,
        failing: Arc<Mutex<bool>>,
    }

    impl FlakyLog {
        fn check(&self) -> Result<(), io::Error> {
            if *self.failing.lock().unwrap() {
                Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
            } else {
                Ok(())
            }
        }
    }

    impl Log<WriteAheadLogEntry> for FlakyLog {
        fn append(&mut self, entry: WriteAheadLogEntry) -> Result<Index, io::Error> {
            self.check()?;
            self.inner.append(entry)
        }

        fn read(&self, index: Index) -> Result<Option<WriteAheadLogEntry>, io::Error> {
            self.check()?;
            self.inner.read(index)
        }

        fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
            self.check()?;
            self.inner.truncate(index)
        }

        fn next_index(&self) -> Index {
            self.inner.next_index()
        }
    }

    struct Sent(Arc<Mutex<Vec<(ReplicaId, RaftMessage)>>>);

    impl RaftTransport for Sent {
        fn send(&self, to: &ReplicaId, message: RaftMessage) {
            self.0.lock().unwrap().push((to.clone(), message));
        }
    }

    /// Counts every arm and reset of an election timer.
    #[derive(Clone, Default)]
    struct CountingTimers(Arc<Mutex<usize>>);

    struct CountingElectionTimer(Arc<Mutex<usize>>);

    impl ElectionTimer for CountingElectionTimer {
        fn reset(&self, _timeout: Duration) {
            *self.0.lock().unwrap() += 1;
        }
    }

    struct NoopHeartbeatTimer;

    impl HeartbeatTimer for NoopHeartbeatTimer {
        fn reset(&self) {}
    }

    impl ReplicaTimers for CountingTimers {
        fn election_timer(&self, _timeout: Duration) -> Box<dyn ElectionTimer> {
            *self.0.lock().unwrap() += 1;
            Box::new(CountingElectionTimer(self.0.clone()))
        }

        fn heartbeat_timer(&self, _term: Term) -> Box<dyn HeartbeatTimer> {
            Box::new(NoopHeartbeatTimer)
        }
    }

    fn flaky_replica(
        cluster_size: usize,
    ) -> (
        Replica<FlakyLog, VolatileLocalState>,
        Arc<Mutex<bool>>,
        Arc<Mutex<Vec<(ReplicaId, RaftMessage)>>>,
    ) {
        flaky_replica_with_timers(cluster_size, Box::new(ManualTimers))
    }

    fn flaky_replica_with_timers(
        cluster_size: usize,
        timers: Box<dyn ReplicaTimers>,
    ) -> (
        Replica<FlakyLog, VolatileLocalState>,
        Arc<Mutex<bool>>,
        Arc<Mutex<Vec<(ReplicaId, RaftMessage)>>>,
    ) {
        let me = ReplicaId::new("replica-1");
        let members = (1..=cluster_size)
            .map(|n| ReplicaMetadata::new(ReplicaId::new(format!("replica-{}", n)), Ipv4Addr::LOCALHOST, 7000))
            .collect();
        let failing = Arc::new(Mutex::new(false));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (publisher, _commit_stream) = new_commit_stream();

        let (replica, _listener) = Replica::new(ReplicaConfig {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            cluster_tracker: ClusterTracker::create_valid_cluster(me.clone(), members).unwrap(),
            log: FlakyLog {
                inner: InMemoryLog::create().unwrap(),
                failing: failing.clone(),
            },
            local_state: VolatileLocalState::new(me),
            commit_stream_publisher: publisher,
            transport: Box::new(Sent(sent.clone())),
            timers,
            follower_min_timeout: Duration::from_millis(150),
            follower_max_timeout: Duration::from_millis(300),
            max_entries_per_request: 64,
        })
        .unwrap();

        (replica, failing, sent)
    }

    fn input(data: &'static str) -> EnqueueForReplicationInput {
        EnqueueForReplicationInput {
            data: Bytes::from_static(data.as_bytes()),
        }
    }

    #[test]
    fn storage_failure_on_enqueue_halts() {
        let (mut replica, failing, _sent) = flaky_replica(1);
        replica.handle_election_timeout();
        assert!(replica.is_leader());
        replica.handle_enqueue_for_replication(input("ok")).unwrap();

        *failing.lock().unwrap() = true;
        match replica.handle_enqueue_for_replication(input("lost")) {
            Err(EnqueueForReplicationError::LocalIoError(_)) => {}
            other => panic!("Unexpected {:?}", other),
        }
        assert!(replica.is_halted());

        // Even once the disk recovers, a halted replica stays halted.
        *failing.lock().unwrap() = false;
        assert!(matches!(
            replica.handle_enqueue_for_replication(input("later")),
            Err(EnqueueForReplicationError::LocalIoError(_))
        ));
        let vote = RaftMessage::RequestVote(RequestVote {
            term: Term::new(7),
            candidate_id: ReplicaId::new("replica-1"),
            last_log_entry: None,
        });
        assert!(matches!(
            replica.handle_message(ReplicaId::new("replica-1"), vote),
            Err(HandleMessageError::Halted)
        ));
    }

    #[test]
    fn storage_failure_on_message_halts() {
        let (mut replica, failing, sent) = flaky_replica(3);
        *failing.lock().unwrap() = true;

        let request = RaftMessage::AppendEntries(AppendEntries {
            term: Term::new(1),
            leader_id: ReplicaId::new("replica-2"),
            previous_log_entry: None,
            entries: vec![LogEntry {
                index: Index::new(1),
                term: Term::new(1),
                data: Bytes::from_static(b"x"),
            }],
            leader_commit: None,
        });
        match replica.handle_message(ReplicaId::new("replica-2"), request) {
            Err(HandleMessageError::StorageFailure(_)) => {}
            other => panic!("Unexpected {:?}", other),
        }
        assert!(replica.is_halted());

        // Halted replicas don't campaign.
        replica.handle_election_timeout();
        assert_eq!(replica.current_term(), Term::new(1));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn election_broadcasts_request_vote() {
        let (mut replica, _failing, sent) = flaky_replica(3);
        replica.handle_election_timeout();

        let sent = sent.lock().unwrap();
        let recipients: Vec<&str> = sent.iter().map(|(to, _)| to.as_str()).collect();
        assert_eq!(recipients, vec!["replica-2", "replica-3"]);
        for (_, message) in sent.iter() {
            assert_eq!(
                *message,
                RaftMessage::RequestVote(RequestVote {
                    term: Term::new(1),
                    candidate_id: ReplicaId::new("replica-1"),
                    last_log_entry: None,
                })
            );
        }
        assert_eq!(replica.voted_for(), Some(ReplicaId::new("replica-1")));
    }

    #[test]
    fn newer_term_vote_denial_leaves_election_timer_alone() {
        let timers = CountingTimers::default();
        let (mut replica, _failing, _sent) = flaky_replica_with_timers(3, Box::new(timers.clone()));

        let heartbeat = RaftMessage::AppendEntries(AppendEntries {
            term: Term::new(1),
            leader_id: ReplicaId::new("replica-2"),
            previous_log_entry: None,
            entries: vec![LogEntry {
                index: Index::new(1),
                term: Term::new(1),
                data: Bytes::from_static(b"x"),
            }],
            leader_commit: None,
        });
        replica.handle_message(ReplicaId::new("replica-2"), heartbeat).unwrap();
        let armed = *timers.0.lock().unwrap();

        // Candidate with an empty log is behind us.
        let lagging_vote = RaftMessage::RequestVote(RequestVote {
            term: Term::new(5),
            candidate_id: ReplicaId::new("replica-3"),
            last_log_entry: None,
        });
        let reply = replica.handle_message(ReplicaId::new("replica-3"), lagging_vote).unwrap();
        assert_eq!(
            reply,
            Some(RaftMessage::RequestVoteReply(RequestVoteReply {
                term: Term::new(5),
                vote_granted: false,
            }))
        );
        assert_eq!(replica.current_term(), Term::new(5));
        assert_eq!(*timers.0.lock().unwrap(), armed);

        // Granting a vote does reset it.
        let good_vote = RaftMessage::RequestVote(RequestVote {
            term: Term::new(5),
            candidate_id: ReplicaId::new("replica-2"),
            last_log_entry: Some((Term::new(1), Index::new(1))),
        });
        let reply = replica.handle_message(ReplicaId::new("replica-2"), good_vote).unwrap();
        assert_eq!(
            reply,
            Some(RaftMessage::RequestVoteReply(RequestVoteReply {
                term: Term::new(5),
                vote_granted: true,
            }))
        );
        assert_eq!(*timers.0.lock().unwrap(), armed + 1);
    }

    #[test]
    fn append_entries_at_the_end_of_the_index_space_does_not_panic() {
        let (mut replica, _failing, _sent) = flaky_replica(3);
        let last = Index::new(u64::MAX);

        let probe_at_end = RaftMessage::AppendEntries(AppendEntries {
            term: Term::new(1),
            leader_id: ReplicaId::new("replica-2"),
            previous_log_entry: Some((Term::new(1), last)),
            entries: vec![],
            leader_commit: None,
        });
        let reply = replica.handle_message(ReplicaId::new("replica-2"), probe_at_end).unwrap();
        assert_eq!(
            reply,
            Some(RaftMessage::AppendEntriesReply(AppendEntriesReply {
                term: Term::new(1),
                success: false,
                match_index: Some(last),
            }))
        );

        let past_end = RaftMessage::AppendEntries(AppendEntries {
            term: Term::new(1),
            leader_id: ReplicaId::new("replica-2"),
            previous_log_entry: Some((Term::new(1), last)),
            entries: vec![LogEntry {
                index: Index::new(1),
                term: Term::new(1),
                data: Bytes::from_static(b"x"),
            }],
            leader_commit: None,
        });
        assert!(matches!(
            replica.handle_message(ReplicaId::new("replica-2"), past_end),
            Err(HandleMessageError::MalformedMessage(_, _))
        ));
        assert!(!replica.is_halted());
    }

    #[test]
    fn leader_ignores_rejection_for_out_of_range_index() {
        let (mut replica, _failing, sent) = flaky_replica(3);
        replica.handle_election_timeout();
        let granted = RaftMessage::RequestVoteReply(RequestVoteReply {
            term: Term::new(1),
            vote_granted: true,
        });
        replica.handle_message(ReplicaId::new("replica-2"), granted).unwrap();
        assert!(replica.is_leader());
        sent.lock().unwrap().clear();

        let rejection = RaftMessage::AppendEntriesReply(AppendEntriesReply {
            term: Term::new(1),
            success: false,
            match_index: Some(Index::new(u64::MAX)),
        });
        assert_eq!(replica.handle_message(ReplicaId::new("replica-2"), rejection).unwrap(), None);
        assert!(replica.is_leader());
        assert!(sent.lock().unwrap().is_empty());
    }
}
