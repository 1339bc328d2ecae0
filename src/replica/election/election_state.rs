use crate::commitlog::Index;
use crate::replica::election::state_change_listener::{self, ElectionStateChangeNotifier};
use crate::replica::election::{
    ElectionStateChangeListener, ElectionStateSnapshot, ElectionTimer, HeartbeatTimer, LeaderStateTracker,
    ReplicaTimers,
};
use crate::replica::{LeaderRedirectInfo, ReplicaId, Term};
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_replica_id: ReplicaId,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
}

/// ElectionState is responsible for holding state specific to the stage in an election. Its
/// methods are responsible for "what" to do. It is NOT responsible for validating anything
/// specific to logs, terms, peers, etc. or knowing "when" to do something.
pub(crate) struct ElectionState {
    state: State,
    config: ElectionConfig,
    timers: Box<dyn ReplicaTimers>,
    state_change_notifier: ElectionStateChangeNotifier,
}

enum State {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct LeaderState {
    tracker: LeaderStateTracker,
    heartbeat_timer: Box<dyn HeartbeatTimer>,
}

struct CandidateState {
    received_votes_from: HashSet<ReplicaId>,
    _election_timer: Box<dyn ElectionTimer>,
}

struct FollowerState {
    leader: Option<LeaderRedirectInfo>,
    election_timer: Box<dyn ElectionTimer>,
}

impl ElectionState {
    /// `new_follower()` creates a new ElectionState instance that starts out as a follower.
    pub(crate) fn new_follower(
        config: ElectionConfig,
        timers: Box<dyn ReplicaTimers>,
    ) -> (Self, ElectionStateChangeListener) {
        let timeout = random_timeout(&config);
        let initial_state = State::Follower(FollowerState {
            leader: None,
            election_timer: timers.election_timer(timeout),
        });
        let (notifier, listener) = state_change_listener::new(Self::current_state_impl(&initial_state));

        let election_state = Self {
            state: initial_state,
            config,
            timers,
            state_change_notifier: notifier,
        };

        (election_state, listener)
    }

    pub(crate) fn transition_to_follower(&mut self, new_leader: Option<LeaderRedirectInfo>) {
        let election_timer = self.timers.election_timer(self.random_timeout());
        self.state = State::Follower(FollowerState {
            leader: new_leader,
            election_timer,
        });
        self.notify_new_state();
    }

    /// A newer term ends any leadership or candidacy. A follower keeps its running election
    /// timer and only forgets the old term's leader; the timer is reset by the caller when it
    /// grants a vote or accepts AppendEntries.
    pub(crate) fn step_down_for_newer_term(&mut self) {
        match &mut self.state {
            State::Follower(fs) => {
                if fs.leader.take().is_some() {
                    self.notify_new_state();
                }
            }
            State::Leader(_) | State::Candidate(_) => self.transition_to_follower(None),
        }
    }

    /// Also used by a candidate whose election timed out; the fresh timer and empty tally start
    /// the next round.
    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self) {
        let mut received_votes_from = HashSet::with_capacity(3);
        received_votes_from.insert(self.config.my_replica_id.clone());

        self.state = State::Candidate(CandidateState {
            received_votes_from,
            _election_timer: self.timers.election_timer(self.random_timeout()),
        });
        self.notify_new_state();
    }

    pub(crate) fn transition_to_leader<I: IntoIterator<Item = ReplicaId>>(
        &mut self,
        term: Term,
        peer_ids: I,
        latest_index: Option<Index>,
    ) {
        self.state = State::Leader(LeaderState {
            tracker: LeaderStateTracker::new(peer_ids, latest_index),
            heartbeat_timer: self.timers.heartbeat_timer(term),
        });
        self.notify_new_state();
    }

    pub(crate) fn current_state(&self) -> ElectionStateSnapshot {
        Self::current_state_impl(&self.state)
    }

    fn current_state_impl(state: &State) -> ElectionStateSnapshot {
        match state {
            State::Leader(_) => ElectionStateSnapshot::Leader,
            State::Candidate(_) => ElectionStateSnapshot::Candidate,
            State::Follower(FollowerState { leader: None, .. }) => ElectionStateSnapshot::FollowerNoLeader,
            State::Follower(FollowerState {
                leader: Some(leader_info),
                ..
            }) => ElectionStateSnapshot::Follower(leader_info.clone()),
        }
    }

    fn notify_new_state(&self) {
        self.state_change_notifier
            .notify_new_state(Self::current_state_impl(&self.state));
    }

    fn random_timeout(&self) -> Duration {
        random_timeout(&self.config)
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    pub(crate) fn is_candidate(&self) -> bool {
        matches!(self.state, State::Candidate(_))
    }

    pub(crate) fn known_leader(&self) -> Option<&LeaderRedirectInfo> {
        match &self.state {
            State::Follower(fs) => fs.leader.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.election_timer.reset(self.random_timeout());
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, leader: &LeaderRedirectInfo) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader.replace(leader.clone());
                self.notify_new_state();
            }
        }
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: ReplicaId) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            cs.received_votes_from.insert(vote_from);
            Some(cs.received_votes_from.len())
        } else {
            None
        }
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderStateTracker> {
        if let State::Leader(ls) = &self.state {
            Some(&ls.tracker)
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(ls) = &mut self.state {
            Some(&mut ls.tracker)
        } else {
            None
        }
    }

    /// Called after a proactive broadcast, so the periodic heartbeat doesn't follow right behind.
    pub(crate) fn reset_heartbeat_timer_if_leader(&self) {
        if let State::Leader(ls) = &self.state {
            ls.heartbeat_timer.reset();
        }
    }
}

fn random_timeout(config: &ElectionConfig) -> Duration {
    let range = RangeInclusive::new(config.follower_min_timeout, config.follower_max_timeout);
    rand::thread_rng().gen_range(range)
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(cs) => write!(f, "Candidate(Votes={})", cs.received_votes_from.len()),
            State::Follower(FollowerState {
                leader: Some(leader_info),
                ..
            }) => write!(f, "Follower(Leader={:?})", leader_info.replica_id),
            State::Follower(FollowerState { leader: None, .. }) => write!(f, "Follower(Leader=None)"),
        }
    }
}
