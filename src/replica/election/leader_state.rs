use crate::commitlog::Index;
use crate::replica::ReplicaId;
use std::collections::HashMap;

/// LeaderStateTracker holds the leader's view of each follower's log. It is created fresh on
/// every election win and thrown away when leadership is lost.
pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<ReplicaId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new<I: IntoIterator<Item = ReplicaId>>(peer_ids: I, latest_index: Option<Index>) -> Self {
        let peer_state = peer_ids
            .into_iter()
            .map(|peer_id| (peer_id, PeerState::new(latest_index)))
            .collect();

        LeaderStateTracker { peer_state }
    }

    pub(crate) fn peer_state(&self, peer_id: &ReplicaId) -> Option<&PeerState> {
        self.peer_state.get(peer_id)
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &ReplicaId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peer_ids(&self) -> Vec<ReplicaId> {
        let mut peer_ids: Vec<ReplicaId> = self.peer_state.keys().cloned().collect();
        peer_ids.sort();
        peer_ids
    }

    pub(crate) fn matched_indexes(&self) -> impl Iterator<Item = Option<Index>> + '_ {
        self.peer_state.values().map(|ps| ps.matched())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PeerState {
    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Option<Index>,
}

impl PeerState {
    fn new(latest_index: Option<Index>) -> Self {
        PeerState {
            next: latest_index.map(|i| i.plus(1)).unwrap_or_else(Index::start_index),
            matched: None,
        }
    }

    pub(crate) fn next(&self) -> Index {
        self.next
    }

    pub(crate) fn previous_index(&self) -> Option<Index> {
        self.next.checked_minus(1)
    }

    pub(crate) fn matched(&self) -> Option<Index> {
        self.matched
    }

    /// Follower has every entry up to and including `match_index`. Replies can arrive late,
    /// duplicated or out of order, so this only ever moves state forward.
    ///
    /// Returns true if the state was mutated.
    pub(crate) fn handle_success(&mut self, match_index: Option<Index>) -> bool {
        let new_matched = match match_index {
            Some(m) if Some(m) > self.matched => m,
            _ => return false,
        };

        let new_next = match new_matched.checked_plus(1) {
            Some(next) => next,
            None => return false,
        };
        self.matched = Some(new_matched);
        if new_next > self.next {
            self.next = new_next;
        }
        true
    }

    /// Follower has no entry matching `rejected_previous_index`. We only step back when the
    /// rejection is for the probe we'd currently send; anything else is a stale reply.
    ///
    /// Returns true if the state was mutated.
    pub(crate) fn handle_rejection(&mut self, logger: &slog::Logger, rejected_previous_index: Option<Index>) -> bool {
        let rejected = match rejected_previous_index {
            Some(rejected) => rejected,
            None => {
                // An empty prefix always matches, so the peer is sending garbage.
                slog::warn!(logger, "Peer rejected AppendEntries for the empty log prefix");
                return false;
            }
        };

        if rejected.checked_plus(1) != Some(self.next) || Some(rejected) <= self.matched {
            slog::debug!(
                logger,
                "Ignoring stale rejection: rejected={:?} next={:?} matched={:?}",
                rejected,
                self.next,
                self.matched
            );
            return false;
        }

        self.next = rejected;
        true
    }
}
