use std::collections::{HashMap, HashSet};

use crate::raft::types::{LogEntry, MessageId};

/// The applied key-value state machine. Entries land here exactly once, in
/// index order, after they are committed; this is the point where a PUT
/// becomes externally visible.
#[derive(Debug, Default)]
pub struct KvStore {
    data: HashMap<String, String>,
    /// Message ids already applied, so a retried write is never applied twice.
    /// Unbounded while log compaction stays out of scope.
    applied_ids: HashSet<MessageId>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one committed entry. Returns false if the entry's message id was
    /// already applied and the write was skipped.
    pub fn apply(&mut self, entry: &LogEntry) -> bool {
        if !self.applied_ids.insert(entry.message_id.clone()) {
            tracing::debug!(
                "Skipping already-applied message {} at index {}",
                entry.message_id,
                entry.index
            );
            return false;
        }
        self.data.insert(entry.key.clone(), entry.value.clone());
        true
    }

    /// Read from applied state. May lag the leader; see the stale-read policy
    /// in DESIGN.md.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
