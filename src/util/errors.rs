use std::io;

use crate::raft::types::{LogIndex, NodeId, Term};

#[derive(Debug)]
pub enum RaftError {
    /// Message carried a term older than ours; sender should step down
    StaleTerm { message_term: Term, current_term: Term },
    /// prev_log_index/prev_log_term check failed on a follower
    LogMismatch,
    /// Client write reached a replica that is not the leader
    NotLeader { leader_hint: Option<NodeId> },
    /// Client write did not commit before its deadline; safe to retry by message_id
    CommitTimeout,
    /// Log lookup past the tail; a local contract violation, not a network fault
    IndexOutOfRange(LogIndex),
    StorageError(String),
    IoError(io::Error),
    SerializationError(String),
    InvalidConfig(String),
}

impl std::fmt::Display for RaftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftError::StaleTerm {
                message_term,
                current_term,
            } => write!(
                f,
                "Stale term: message term {} < current term {}",
                message_term, current_term
            ),
            RaftError::LogMismatch => write!(f, "Log mismatch at previous entry"),
            RaftError::NotLeader { leader_hint } => match leader_hint {
                Some(leader) => write!(f, "Not leader, try {}", leader),
                None => write!(f, "Not leader, leader unknown"),
            },
            RaftError::CommitTimeout => write!(f, "Write not committed before deadline"),
            RaftError::IndexOutOfRange(index) => {
                write!(f, "Log index {} out of range", index)
            }
            RaftError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            RaftError::IoError(err) => write!(f, "IO error: {}", err),
            RaftError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            RaftError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for RaftError {}

impl From<io::Error> for RaftError {
    fn from(err: io::Error) -> Self {
        RaftError::IoError(err)
    }
}

impl From<bincode::Error> for RaftError {
    fn from(err: bincode::Error) -> Self {
        RaftError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RaftError>;
