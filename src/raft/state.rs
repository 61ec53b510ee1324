use std::collections::{HashMap, HashSet};

use super::types::{LogIndex, NodeId, Term};

/// The three roles a replica can be in. Exactly one at any instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaRole {
    /// Receives updates from the leader, votes in elections
    Follower,
    /// Requesting votes for leadership
    Candidate,
    /// Drives log replication and commit advancement
    Leader,
}

impl std::fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaRole::Follower => write!(f, "Follower"),
            ReplicaRole::Candidate => write!(f, "Candidate"),
            ReplicaRole::Leader => write!(f, "Leader"),
        }
    }
}

/// Complete volatile state of one replica, owned by its actor
#[derive(Debug, Clone)]
pub struct ReplicaState {
    // Persistent state on all replicas (mirrored to the StateStore
    // before any vote or append is acknowledged)
    /// Latest term this replica has seen (initialized to 0)
    pub current_term: Term,
    /// Candidate that received our vote in the current term (or None)
    pub voted_for: Option<NodeId>,

    // Volatile state on all replicas
    /// Index of highest log entry known to be committed
    pub commit_index: LogIndex,
    /// Index of highest log entry applied to the key-value state machine
    pub last_applied: LogIndex,
    /// Current role of this replica
    pub role: ReplicaRole,
    /// ID of the current leader, if known; served to clients as a redirect hint
    pub current_leader: Option<NodeId>,
    /// This replica's ID
    pub node_id: NodeId,

    // Volatile state on leaders (reinitialized after election)
    /// For each peer, index of the next log entry to send
    pub next_index: HashMap<NodeId, LogIndex>,
    /// For each peer, index of highest log entry known to be replicated there
    pub match_index: HashMap<NodeId, LogIndex>,

    // Election state for candidates
    /// Replicas that voted for this candidate in the current election
    pub votes_received: HashSet<NodeId>,
}

impl ReplicaState {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            commit_index: 0,
            last_applied: 0,
            role: ReplicaRole::Follower,
            current_leader: None,
            node_id,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes_received: HashSet::new(),
        }
    }

    pub fn is_follower(&self) -> bool {
        self.role == ReplicaRole::Follower
    }

    pub fn is_candidate(&self) -> bool {
        self.role == ReplicaRole::Candidate
    }

    pub fn is_leader(&self) -> bool {
        self.role == ReplicaRole::Leader
    }

    /// Transition to follower, acknowledging `term`
    pub fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        tracing::info!(
            "Replica {} transitioning to Follower (term: {})",
            self.node_id,
            term
        );
        assert!(
            term >= self.current_term,
            "term must increase monotonically, tried to go from {} to {}",
            self.current_term,
            term
        );
        if term > self.current_term {
            self.voted_for = None;
        }
        self.role = ReplicaRole::Follower;
        self.current_term = term;
        self.current_leader = leader;
        self.votes_received.clear();
    }

    /// Transition to candidate: bump the term, vote for self
    pub fn become_candidate(&mut self) {
        self.current_term += 1;
        self.role = ReplicaRole::Candidate;
        self.voted_for = Some(self.node_id.clone());
        self.current_leader = None;
        self.votes_received.clear();
        self.votes_received.insert(self.node_id.clone());

        tracing::info!(
            "Replica {} transitioning to Candidate (term: {})",
            self.node_id,
            self.current_term
        );
    }

    /// Transition to leader: reinitialize per-peer replication progress
    pub fn become_leader(&mut self, last_log_index: LogIndex, peer_ids: &[NodeId]) {
        tracing::info!(
            "Replica {} transitioning to Leader (term: {})",
            self.node_id,
            self.current_term
        );

        self.role = ReplicaRole::Leader;
        self.current_leader = Some(self.node_id.clone());

        self.next_index.clear();
        self.match_index.clear();

        for peer_id in peer_ids {
            if *peer_id != self.node_id {
                self.next_index.insert(peer_id.clone(), last_log_index + 1);
                self.match_index.insert(peer_id.clone(), 0);
            }
        }

        self.votes_received.clear();
    }

    /// Record a vote granted to this candidate
    pub fn add_vote(&mut self, from: NodeId) {
        self.votes_received.insert(from);
    }

    /// Whether the recorded votes form a strict majority of the cluster
    pub fn has_majority(&self, total_nodes: usize) -> bool {
        let majority = (total_nodes / 2) + 1;
        self.votes_received.len() >= majority
    }

    /// Step down if we see a higher term. Returns true if the term advanced
    pub fn update_term(&mut self, term: Term) -> bool {
        if term > self.current_term {
            tracing::info!(
                "Replica {} updating term from {} to {}",
                self.node_id,
                self.current_term,
                term
            );
            self.become_follower(term, None);
            true
        } else {
            false
        }
    }

    /// Advance the commit index. Never moves backwards
    pub fn set_commit_index(&mut self, commit_index: LogIndex) {
        assert!(
            commit_index >= self.commit_index,
            "commit index must increase monotonically, tried to go from {} to {}",
            self.commit_index,
            commit_index
        );
        self.commit_index = commit_index;
    }
}
