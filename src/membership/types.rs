use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

/// Cluster-unique node name
pub type NodeName = String;

/// Liveness of a member as seen by the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

impl NodeState {
    /// Suspects are still routed to until they are declared dead
    pub fn is_reachable(&self) -> bool {
        matches!(self, NodeState::Alive | NodeState::Suspect)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Alive => write!(f, "alive"),
            NodeState::Suspect => write!(f, "suspect"),
            NodeState::Dead => write!(f, "dead"),
        }
    }
}

/// A member of the gossip cluster.
///
/// `incarnation` orders conflicting claims about the same member: a higher
/// incarnation always wins, which is how a node refutes being suspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: NodeName,
    pub gossip_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// Gossip wire protocol (bincode over UDP)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeName,
        incarnation: u64,
    },

    Ack {
        from: NodeName,
        incarnation: u64,
        members: Vec<Member>,
    },

    Join {
        name: NodeName,
        incarnation: u64,
    },

    JoinAck {
        from: NodeName,
        incarnation: u64,
        members: Vec<Member>,
    },

    Suspect {
        name: NodeName,
        incarnation: u64,
    },

    Alive {
        name: NodeName,
        incarnation: u64,
    },
}

/// The set of reachable node names at one point in time.
///
/// Immutable once produced; the next snapshot replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    members: HashSet<NodeName>,
}

impl MembershipSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeName> {
        self.members.iter()
    }

    /// Member names in sorted order, for logging
    pub fn sorted(&self) -> Vec<NodeName> {
        let mut names: Vec<NodeName> = self.members.iter().cloned().collect();
        names.sort();
        names
    }
}

impl<S: Into<NodeName>> FromIterator<S> for MembershipSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Whether two member sets differ.
///
/// Equal iff same cardinality and every member of one is in the other;
/// enumeration order never matters.
pub fn members_changed(a: &MembershipSnapshot, b: &MembershipSnapshot) -> bool {
    if a.len() != b.len() {
        return true;
    }

    a.iter().any(|name| !b.contains(name))
}
