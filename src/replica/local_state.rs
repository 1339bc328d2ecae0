use crate::grpc::ProtoLocalState;
use crate::replica::peers::ReplicaId;
use prost::Message;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fmt, fs, io};

#[derive(Copy, Clone, Default, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct Term(u64);

impl Term {
    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState is used whenever raft requires that something is persisted to a
/// durable store to guarantee safety. Not everything that uses disk has to go through this, only
/// algorithm-correctness-critical ones.
///
/// Store methods should be implemented atomically via a CAS like operation. Similar to most CAS
/// method signatures, the CAS store methods will return true if we have mutated state. A method
/// only returns `Ok` once the new state is durable.
pub(crate) trait PersistentLocalState: Send {
    /// Set current term to `new_term` atomically, iff it is larger than current term. Clears the
    /// vote, since we haven't voted in the new term yet.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, io::Error>;

    /// Store our vote for the latest term iff the latest term (internal state) is the same term as
    /// the one provided, and we have not stored a vote for the latest term.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: ReplicaId)
        -> Result<bool, io::Error>;

    /// Return the new term. Used when transitioning to candidate.
    fn increment_term_and_vote_for_self(&mut self) -> Result<Term, io::Error>;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<Arc<ReplicaId>>);
}

#[derive(Clone)]
struct TermAndVote {
    current_term: Term,
    voted_for_this_term: Option<Arc<ReplicaId>>,
}

impl TermAndVote {
    fn initial() -> Self {
        TermAndVote {
            current_term: Term::new(0),
            voted_for_this_term: None,
        }
    }

    /// Returns the state after the mutation, or None if the CAS condition doesn't hold.
    fn with_term_if_increased(&self, new_term: Term) -> Option<TermAndVote> {
        if new_term <= self.current_term {
            None
        } else {
            Some(TermAndVote {
                current_term: new_term,
                voted_for_this_term: None,
            })
        }
    }

    fn with_vote_if_unvoted(&self, expected_term: Term, vote: ReplicaId) -> Option<TermAndVote> {
        if expected_term == self.current_term && self.voted_for_this_term.is_none() {
            Some(TermAndVote {
                current_term: self.current_term,
                voted_for_this_term: Some(Arc::new(vote)),
            })
        } else {
            None
        }
    }

    fn with_incremented_term_and_vote(&self, me: Arc<ReplicaId>) -> TermAndVote {
        let mut current_term = self.current_term;
        current_term.incr();
        TermAndVote {
            current_term,
            voted_for_this_term: Some(me),
        }
    }
}

/// In memory only. Restarting the process forgets the term and vote, which is only safe when the
/// commit log is also in memory (a restarted replica then rejoins as a brand new empty member).
pub(crate) struct VolatileLocalState {
    state: TermAndVote,
    my_replica_id: Arc<ReplicaId>,
}

impl VolatileLocalState {
    pub(crate) fn new(my_replica_id: ReplicaId) -> Self {
        VolatileLocalState {
            state: TermAndVote::initial(),
            my_replica_id: Arc::new(my_replica_id),
        }
    }
}

impl PersistentLocalState for VolatileLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, io::Error> {
        match self.state.with_term_if_increased(new_term) {
            Some(new_state) => {
                self.state = new_state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: ReplicaId) -> Result<bool, io::Error> {
        match self.state.with_vote_if_unvoted(expected_term, vote) {
            Some(new_state) => {
                self.state = new_state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn increment_term_and_vote_for_self(&mut self) -> Result<Term, io::Error> {
        self.state = self.state.with_incremented_term_and_vote(self.my_replica_id.clone());
        Ok(self.state.current_term)
    }

    fn current_term(&self) -> Term {
        self.state.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<Arc<ReplicaId>>) {
        (self.state.current_term, self.state.voted_for_this_term.clone())
    }
}

/// Term and vote persisted to a single small file. Each mutation writes a temp file, fsyncs it and
/// renames it over the previous one, so a crash leaves either the old or the new state.
pub(crate) struct DiskLocalState {
    path: PathBuf,
    state: TermAndVote,
    my_replica_id: Arc<ReplicaId>,
}

impl DiskLocalState {
    pub(crate) fn open<P: AsRef<Path>>(path: P, my_replica_id: ReplicaId) -> Result<Self, io::Error> {
        let path = path.as_ref().to_path_buf();
        let state = match File::open(&path) {
            Ok(mut file) => {
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                Self::decode(&bytes)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => TermAndVote::initial(),
            Err(e) => return Err(e),
        };

        Ok(DiskLocalState {
            path,
            state,
            my_replica_id: Arc::new(my_replica_id),
        })
    }

    fn decode(bytes: &[u8]) -> Result<TermAndVote, io::Error> {
        let proto = ProtoLocalState::decode(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let voted_for_this_term = if proto.has_voted {
            Some(Arc::new(ReplicaId::new(proto.voted_for)))
        } else {
            None
        };

        Ok(TermAndVote {
            current_term: Term::new(proto.current_term),
            voted_for_this_term,
        })
    }

    fn encode(state: &TermAndVote) -> Result<Vec<u8>, io::Error> {
        let proto = ProtoLocalState {
            current_term: state.current_term.as_u64(),
            has_voted: state.voted_for_this_term.is_some(),
            voted_for: state
                .voted_for_this_term
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default(),
        };

        let mut bytes = Vec::with_capacity(proto.encoded_len());
        proto
            .encode(&mut bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(bytes)
    }

    fn persist(&mut self, new_state: TermAndVote) -> Result<(), io::Error> {
        let bytes = Self::encode(&new_state)?;

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp_file.write_all(&bytes)?;
            tmp_file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }

        // Only update in-memory state once it's durable.
        self.state = new_state;
        Ok(())
    }
}

impl PersistentLocalState for DiskLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, io::Error> {
        match self.state.with_term_if_increased(new_term) {
            Some(new_state) => self.persist(new_state).map(|_| true),
            None => Ok(false),
        }
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: ReplicaId) -> Result<bool, io::Error> {
        match self.state.with_vote_if_unvoted(expected_term, vote) {
            Some(new_state) => self.persist(new_state).map(|_| true),
            None => Ok(false),
        }
    }

    fn increment_term_and_vote_for_self(&mut self) -> Result<Term, io::Error> {
        let new_state = self.state.with_incremented_term_and_vote(self.my_replica_id.clone());
        let new_term = new_state.current_term;
        self.persist(new_state)?;
        Ok(new_term)
    }

    fn current_term(&self) -> Term {
        self.state.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<Arc<ReplicaId>>) {
        (self.state.current_term, self.state.voted_for_this_term.clone())
    }
}
