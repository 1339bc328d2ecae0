use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

/// ReplicaId...or maybe it should be NodeId or ServerId. Idk.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        ReplicaId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ReplicaMetadata {
    replica_id: ReplicaId,
    ip_addr: Ipv4Addr,
    port: u16,
}

impl ReplicaMetadata {
    pub(crate) fn new(replica_id: ReplicaId, ip_addr: Ipv4Addr, port: u16) -> Self {
        ReplicaMetadata {
            replica_id,
            ip_addr,
            port,
        }
    }

    pub(crate) fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    pub(crate) fn ip_addr(&self) -> Ipv4Addr {
        self.ip_addr
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub(crate) enum InvalidCluster {
    #[error("My replica ID {0} is not in the cluster")]
    MeNotInCluster(ReplicaId),
    #[error("Replica ID {0} appears more than once")]
    DuplicateReplicaId(ReplicaId),
}

/// ClusterTracker knows the fixed membership of the cluster. Membership never changes after
/// creation.
pub(crate) struct ClusterTracker {
    my_replica_id: ReplicaId,
    members: HashMap<ReplicaId, ReplicaMetadata>,
}

impl ClusterTracker {
    pub(crate) fn create_valid_cluster(
        my_replica_id: ReplicaId,
        cluster_members: Vec<ReplicaMetadata>,
    ) -> Result<Self, InvalidCluster> {
        let mut members = HashMap::with_capacity(cluster_members.len());
        for member in cluster_members {
            let replica_id = member.replica_id().clone();
            if members.insert(replica_id.clone(), member).is_some() {
                return Err(InvalidCluster::DuplicateReplicaId(replica_id));
            }
        }

        if !members.contains_key(&my_replica_id) {
            return Err(InvalidCluster::MeNotInCluster(my_replica_id));
        }

        Ok(ClusterTracker { my_replica_id, members })
    }

    pub(crate) fn my_replica_id(&self) -> &ReplicaId {
        &self.my_replica_id
    }

    pub(crate) fn contains_member(&self, replica_id: &ReplicaId) -> bool {
        self.members.contains_key(replica_id)
    }

    pub(crate) fn metadata(&self, replica_id: &ReplicaId) -> Option<&ReplicaMetadata> {
        self.members.get(replica_id)
    }

    /// Everyone except me.
    pub(crate) fn peer_ids(&self) -> HashSet<ReplicaId> {
        self.members
            .keys()
            .filter(|id| **id != self.my_replica_id)
            .cloned()
            .collect()
    }

    pub(crate) fn num_voting_replicas(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn majority(&self) -> usize {
        (self.num_voting_replicas() / 2) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> ReplicaMetadata {
        ReplicaMetadata::new(ReplicaId::new(id), Ipv4Addr::LOCALHOST, 3000)
    }

    #[test]
    fn majority_sizes() {
        for (size, expected_majority) in vec![(1, 1), (2, 2), (3, 2), (4, 3), (5, 3), (6, 4), (7, 4)] {
            let members = (0..size).map(|i| member(&format!("r{}", i))).collect();
            let cluster = ClusterTracker::create_valid_cluster(ReplicaId::new("r0"), members).unwrap();
            assert_eq!(cluster.majority(), expected_majority, "cluster size {}", size);
            assert_eq!(cluster.peer_ids().len(), size - 1);
        }
    }

    #[test]
    fn invalid_clusters() {
        let result = ClusterTracker::create_valid_cluster(ReplicaId::new("me"), vec![member("a"), member("b")]);
        assert_eq!(result.err(), Some(InvalidCluster::MeNotInCluster(ReplicaId::new("me"))));

        let result = ClusterTracker::create_valid_cluster(ReplicaId::new("a"), vec![member("a"), member("a")]);
        assert_eq!(result.err(), Some(InvalidCluster::DuplicateReplicaId(ReplicaId::new("a"))));
    }
}
