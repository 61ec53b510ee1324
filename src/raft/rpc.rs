use serde::{Deserialize, Serialize};

use super::types::{LogEntry, LogIndex, NodeId, Term};

/// RequestVote RPC - Invoked by candidates to gather votes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    /// Candidate's term
    pub term: Term,
    /// Candidate requesting vote
    pub candidate_id: NodeId,
    /// Index of candidate's last log entry
    pub last_log_index: LogIndex,
    /// Term of candidate's last log entry
    pub last_log_term: Term,
}

/// Vote grant or denial. A denial carries the responder's term so a
/// stale candidate can step down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    /// Current term, for candidate to update itself
    pub term: Term,
    /// True means candidate received vote
    pub vote_granted: bool,
}

/// AppendEntries RPC - Invoked by leader to replicate log entries and as heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term
    pub term: Term,
    /// So followers can redirect clients
    pub leader_id: NodeId,
    /// Index of log entry immediately preceding new ones
    pub prev_log_index: LogIndex,
    /// Term of prev_log_index entry
    pub prev_log_term: Term,
    /// Log entries to store (empty for heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit index
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Current term, for leader to update itself
    pub term: Term,
    /// True if follower contained entry matching prev_log_index and prev_log_term
    pub success: bool,
    /// On success, the highest index now matching the leader's log
    pub match_index: LogIndex,
    /// For faster log backtracking on failure
    pub conflict_index: Option<LogIndex>,
    /// For faster log backtracking on failure
    pub conflict_term: Option<Term>,
}

impl AppendEntriesResponse {
    pub fn rejected(term: Term, conflict_index: Option<LogIndex>, conflict_term: Option<Term>) -> Self {
        Self {
            term,
            success: false,
            match_index: 0,
            conflict_index,
            conflict_term,
        }
    }
}

/// Wrapper for all replica-to-replica messages. Every variant carries the
/// sender's current term so recipients can detect staleness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote(RequestVoteRequest),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl RaftMessage {
    pub fn term(&self) -> Term {
        match self {
            RaftMessage::RequestVote(req) => req.term,
            RaftMessage::RequestVoteResponse(res) => res.term,
            RaftMessage::AppendEntries(req) => req.term,
            RaftMessage::AppendEntriesResponse(res) => res.term,
        }
    }
}
