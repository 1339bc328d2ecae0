//! A deterministic, single threaded raft cluster for tests. Nothing happens unless the test says
//! so: timers only fire when the test fires them, and messages sit in a shared queue until the
//! test delivers them.

use crate::commitlog::{InMemoryLog, Index};
use crate::replica::election::{ElectionTimer, HeartbeatTimer, ReplicaTimers};
use crate::replica::{
    new_commit_stream, ClusterTracker, CommitStream, CommittedEntry, EnqueueForReplicationError,
    EnqueueForReplicationInput, EnqueueForReplicationOutput, HandleMessageError, HeartbeatTick, RaftMessage, RaftTransport, Replica,
    ReplicaConfig, ReplicaId, ReplicaMetadata, Term, VolatileLocalState, WriteAheadLogEntry,
};
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) type TestLog = InMemoryLog<WriteAheadLogEntry>;
pub(crate) type TestReplica = Replica<TestLog, VolatileLocalState>;

#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub(crate) from: ReplicaId,
    pub(crate) to: ReplicaId,
    pub(crate) message: RaftMessage,
}

type Network = Arc<Mutex<Vec<Envelope>>>;

struct QueuedTransport {
    me: ReplicaId,
    network: Network,
}

impl RaftTransport for QueuedTransport {
    fn send(&self, to: &ReplicaId, message: RaftMessage) {
        self.network.lock().unwrap().push(Envelope {
            from: self.me.clone(),
            to: to.clone(),
            message,
        });
    }
}

/// Timers that never fire on their own.
pub(crate) struct ManualTimers;

struct ManualTimer;

impl ElectionTimer for ManualTimer {
    fn reset(&self, _timeout: Duration) {}
}

impl HeartbeatTimer for ManualTimer {
    fn reset(&self) {}
}

impl ReplicaTimers for ManualTimers {
    fn election_timer(&self, _timeout: Duration) -> Box<dyn ElectionTimer> {
        Box::new(ManualTimer)
    }

    fn heartbeat_timer(&self, _term: Term) -> Box<dyn HeartbeatTimer> {
        Box::new(ManualTimer)
    }
}

enum Member {
    Running {
        replica: TestReplica,
        commit_stream: CommitStream,
    },
    Crashed {
        log: TestLog,
        local_state: VolatileLocalState,
    },
}

pub(crate) struct TestCluster {
    logger: slog::Logger,
    metadata: Vec<ReplicaMetadata>,
    members: BTreeMap<ReplicaId, Member>,
    // Everything each replica has published to its application, across restarts.
    applied: BTreeMap<ReplicaId, Vec<CommittedEntry>>,
    network: Network,
    isolated: HashSet<ReplicaId>,
    max_entries_per_request: usize,
}

pub(crate) fn id(n: usize) -> ReplicaId {
    ReplicaId::new(format!("replica-{}", n))
}

impl TestCluster {
    pub(crate) fn new(size: usize) -> Self {
        Self::with_max_entries_per_request(size, 64)
    }

    pub(crate) fn with_max_entries_per_request(size: usize, max_entries_per_request: usize) -> Self {
        let metadata: Vec<ReplicaMetadata> = (1..=size)
            .map(|n| ReplicaMetadata::new(id(n), Ipv4Addr::LOCALHOST, 7000 + n as u16))
            .collect();

        let mut cluster = TestCluster {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            metadata,
            members: BTreeMap::new(),
            applied: BTreeMap::new(),
            network: Arc::new(Mutex::new(Vec::new())),
            isolated: HashSet::new(),
            max_entries_per_request,
        };
        for n in 1..=size {
            let replica_id = id(n);
            let storage = (
                InMemoryLog::create().unwrap(),
                VolatileLocalState::new(replica_id.clone()),
            );
            cluster.start(replica_id, storage);
        }
        cluster
    }

    fn start(&mut self, replica_id: ReplicaId, (log, local_state): (TestLog, VolatileLocalState)) {
        let (publisher, commit_stream) = new_commit_stream();
        let (replica, _listener) = Replica::new(ReplicaConfig {
            logger: self.logger.new(slog::o!("Replica" => replica_id.to_string())),
            cluster_tracker: ClusterTracker::create_valid_cluster(replica_id.clone(), self.metadata.clone())
                .unwrap(),
            log,
            local_state,
            commit_stream_publisher: publisher,
            transport: Box::new(QueuedTransport {
                me: replica_id.clone(),
                network: self.network.clone(),
            }),
            timers: Box::new(ManualTimers),
            follower_min_timeout: Duration::from_millis(150),
            follower_max_timeout: Duration::from_millis(300),
            max_entries_per_request: self.max_entries_per_request,
        })
        .unwrap();

        self.members.insert(replica_id, Member::Running { replica, commit_stream });
    }

    pub(crate) fn replica(&self, replica_id: &ReplicaId) -> &TestReplica {
        match self.members.get(replica_id) {
            Some(Member::Running { replica, .. }) => replica,
            _ => panic!("{} is not running", replica_id),
        }
    }

    fn replica_mut(&mut self, replica_id: &ReplicaId) -> &mut TestReplica {
        match self.members.get_mut(replica_id) {
            Some(Member::Running { replica, .. }) => replica,
            _ => panic!("{} is not running", replica_id),
        }
    }

    pub(crate) fn ids(&self) -> Vec<ReplicaId> {
        self.members.keys().cloned().collect()
    }

    pub(crate) fn running_ids(&self) -> Vec<ReplicaId> {
        self.members
            .iter()
            .filter(|(_, member)| matches!(member, Member::Running { .. }))
            .map(|(replica_id, _)| replica_id.clone())
            .collect()
    }

    pub(crate) fn timeout(&mut self, replica_id: &ReplicaId) {
        self.replica_mut(replica_id).handle_election_timeout();
    }

    pub(crate) fn heartbeat(&mut self, replica_id: &ReplicaId) {
        let term = self.replica(replica_id).current_term();
        self.replica_mut(replica_id).handle_heartbeat_tick(HeartbeatTick { term });
    }

    pub(crate) fn enqueue(
        &mut self,
        replica_id: &ReplicaId,
        data: &str,
    ) -> Result<EnqueueForReplicationOutput, EnqueueForReplicationError> {
        self.replica_mut(replica_id)
            .handle_enqueue_for_replication(EnqueueForReplicationInput {
                data: Bytes::from(data.to_string()),
            })
    }

    pub(crate) fn isolate(&mut self, replica_id: &ReplicaId) {
        self.isolated.insert(replica_id.clone());
    }

    pub(crate) fn heal(&mut self, replica_id: &ReplicaId) {
        self.isolated.remove(replica_id);
    }

    pub(crate) fn pending_messages(&self) -> usize {
        self.network.lock().unwrap().len()
    }

    pub(crate) fn take_pending(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut *self.network.lock().unwrap())
    }

    /// Put a message (back) on the wire, e.g. to duplicate it.
    pub(crate) fn inject(&mut self, envelope: Envelope) {
        self.network.lock().unwrap().push(envelope);
    }

    /// Deliver one message; its reply (if any) is queued.
    pub(crate) fn deliver(&mut self, envelope: Envelope) {
        let Envelope { from, to, message } = envelope;
        if self.isolated.contains(&from) || self.isolated.contains(&to) {
            return;
        }

        let reply = match self.members.get_mut(&to) {
            Some(Member::Running { replica, .. }) => replica
                .handle_message(from.clone(), message)
                .unwrap_or_else(|e| panic!("{} failed to handle message: {}", to, e)),
            // Crashed replicas drop everything.
            _ => None,
        };

        if let Some(reply) = reply {
            self.inject(Envelope {
                from: to,
                to: from,
                message: reply,
            });
        }
    }

    /// Hand a message straight to `to`, bypassing the network.
    pub(crate) fn handle(
        &mut self,
        to: &ReplicaId,
        from: ReplicaId,
        message: RaftMessage,
    ) -> Result<Option<RaftMessage>, HandleMessageError> {
        self.replica_mut(to).handle_message(from, message)
    }

    /// Deliver messages, and the messages they cause, until the network is quiet.
    pub(crate) fn deliver_all(&mut self) {
        for _ in 0..10_000 {
            let pending = self.take_pending();
            if pending.is_empty() {
                return;
            }
            for envelope in pending {
                self.deliver(envelope);
            }
        }
        panic!("Network never went quiet");
    }

    pub(crate) fn drop_all(&mut self) {
        self.take_pending();
    }

    pub(crate) fn leaders(&self) -> Vec<ReplicaId> {
        self.members
            .iter()
            .filter_map(|(replica_id, member)| match member {
                Member::Running { replica, .. } if replica.is_leader() => Some(replica_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn sole_leader(&self) -> ReplicaId {
        let leaders = self.leaders();
        assert_eq!(leaders.len(), 1, "Expected exactly one leader, found {:?}", leaders);
        leaders[0].clone()
    }

    pub(crate) fn term(&self, replica_id: &ReplicaId) -> Term {
        self.replica(replica_id).current_term()
    }

    pub(crate) fn commit_index(&self, replica_id: &ReplicaId) -> Option<Index> {
        self.replica(replica_id).commit_index()
    }

    pub(crate) fn log(&self, replica_id: &ReplicaId) -> Vec<(Term, Vec<u8>)> {
        self.replica(replica_id).log_entries()
    }

    /// Pull whatever each running replica has published to its application since the last call.
    pub(crate) fn collect_applied(&mut self) {
        for (replica_id, member) in self.members.iter_mut() {
            if let Member::Running { commit_stream, .. } = member {
                let applied = self.applied.entry(replica_id.clone()).or_insert_with(Vec::new);
                while let Some(entry) = commit_stream.try_recv() {
                    applied.push(entry);
                }
            }
        }
    }

    /// Everything `replica_id` has ever published, as `(index, term, data)`.
    pub(crate) fn applied(&mut self, replica_id: &ReplicaId) -> Vec<(u64, u64, String)> {
        self.collect_applied();
        self.applied
            .get(replica_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| {
                        (
                            e.index.as_u64(),
                            e.term.as_u64(),
                            String::from_utf8_lossy(&e.data).into_owned(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn crash(&mut self, replica_id: &ReplicaId) {
        self.collect_applied();
        let member = self.members.remove(replica_id).expect("unknown replica");
        let crashed = match member {
            Member::Running { replica, .. } => {
                let (log, local_state) = replica.into_storage();
                Member::Crashed { log, local_state }
            }
            crashed => crashed,
        };
        self.members.insert(replica_id.clone(), crashed);
    }

    pub(crate) fn restart(&mut self, replica_id: &ReplicaId) {
        match self.members.remove(replica_id) {
            Some(Member::Crashed { log, local_state }) => {
                // The application starts over too, and gets every committed entry again.
                self.applied.remove(replica_id);
                self.start(replica_id.clone(), (log, local_state));
            }
            Some(running) => {
                self.members.insert(replica_id.clone(), running);
                panic!("{} is already running", replica_id);
            }
            None => panic!("unknown replica {}", replica_id),
        }
    }

    /// Elect `replica_id` by timing it out and delivering everything.
    pub(crate) fn elect(&mut self, replica_id: &ReplicaId) {
        self.timeout(replica_id);
        self.deliver_all();
        assert!(self.replica(replica_id).is_leader(), "{} failed to get elected", replica_id);
    }

    /// Safety checks that must hold in any state the cluster can reach.
    pub(crate) fn assert_safety(&mut self) {
        // Election Safety: at most one leader per term.
        let mut leader_terms = HashSet::new();
        for leader in self.leaders() {
            assert!(
                leader_terms.insert(self.term(&leader)),
                "Two leaders in term {:?}",
                self.term(&leader)
            );
        }

        // State Machine Safety: no two replicas applied different entries at the same index.
        self.collect_applied();
        let mut by_index: BTreeMap<u64, (u64, Bytes)> = BTreeMap::new();
        for entries in self.applied.values() {
            for (position, entry) in entries.iter().enumerate() {
                assert_eq!(entry.index.as_u64(), position as u64 + 1, "Applied out of order");
                let existing = by_index
                    .entry(entry.index.as_u64())
                    .or_insert_with(|| (entry.term.as_u64(), entry.data.clone()));
                assert_eq!(
                    *existing,
                    (entry.term.as_u64(), entry.data.clone()),
                    "Replicas applied different entries at index {:?}",
                    entry.index
                );
            }
        }

        // Log Matching: same index and term means identical prefixes.
        let running = self.running_ids();
        let logs: BTreeMap<ReplicaId, Vec<(Term, Vec<u8>)>> =
            running.iter().map(|replica_id| (replica_id.clone(), self.log(replica_id))).collect();
        for (a, log_a) in logs.iter() {
            for (b, log_b) in logs.iter() {
                for i in (0..std::cmp::min(log_a.len(), log_b.len())).rev() {
                    if log_a[i].0 == log_b[i].0 {
                        assert_eq!(log_a[..=i], log_b[..=i], "Logs of {} and {} diverge", a, b);
                        break;
                    }
                }
            }
        }

        // Committed entries are present in every running replica's log that claims them.
        for (replica_id, log) in logs.iter() {
            let commit = self.commit_index(replica_id).map(|i| i.as_u64()).unwrap_or(0);
            assert!(commit as usize <= log.len());
        }
    }
}
