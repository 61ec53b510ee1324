use serde::{Deserialize, Serialize};

/// Type alias for term numbers
pub type Term = u64;

/// Type alias for log indices (1-based; 0 means "before the first entry")
pub type LogIndex = u64;

/// Replica identifier
pub type NodeId = String;

/// Client-supplied idempotence token for a write
pub type MessageId = String;

/// A single entry in the replicated log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: Term,
    /// The index of this entry in the log
    pub index: LogIndex,
    /// Idempotence token of the client write that produced this entry
    pub message_id: MessageId,
    /// Key being written
    pub key: String,
    /// Value being written
    pub value: String,
}

impl LogEntry {
    pub fn new(
        term: Term,
        index: LogIndex,
        message_id: impl Into<MessageId>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            term,
            index,
            message_id: message_id.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}
