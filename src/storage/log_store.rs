use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::raft::types::{LogEntry, LogIndex, Term};
use crate::util::errors::{RaftError, Result};

/// Ordered, append-only sequence of entries indexed from 1, exclusively
/// owned by one replica
pub trait LogStore: Send {
    /// Append entries; each index must be exactly one past the current tail
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()>;
    fn get(&self, index: LogIndex) -> Result<Option<LogEntry>>;
    /// Entries in [start, end], inclusive, clamped to the tail
    fn get_range(&self, start: LogIndex, end: LogIndex) -> Result<Vec<LogEntry>>;
    fn last_index(&self) -> LogIndex;
    fn last_term(&self) -> Term;
    /// Discard all entries at or after `from_index`. Only used to resolve
    /// conflicts; callers must never truncate committed entries
    fn truncate_from(&mut self, from_index: LogIndex) -> Result<()>;
}

fn check_contiguous(tail: LogIndex, entry: &LogEntry) -> Result<()> {
    if entry.index != tail + 1 {
        return Err(RaftError::StorageError(format!(
            "non-contiguous append: tail is {}, entry index is {}",
            tail, entry.index
        )));
    }
    Ok(())
}

fn slice_range(entries: &[LogEntry], start: LogIndex, end: LogIndex) -> Vec<LogEntry> {
    if start == 0 || start > end || entries.is_empty() {
        return Vec::new();
    }
    let start_idx = (start - 1) as usize;
    if start_idx >= entries.len() {
        return Vec::new();
    }
    let end_idx = std::cmp::min(end as usize, entries.len());
    entries[start_idx..end_idx].to_vec()
}

/// In-memory log, used by the in-process cluster and tests
#[derive(Default)]
pub struct MemoryLogStore {
    entries: Vec<LogEntry>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        for entry in entries {
            check_contiguous(self.last_index(), &entry)?;
            self.entries.push(entry);
        }
        Ok(())
    }

    fn get(&self, index: LogIndex) -> Result<Option<LogEntry>> {
        if index == 0 {
            return Ok(None);
        }
        Ok(self.entries.get((index - 1) as usize).cloned())
    }

    fn get_range(&self, start: LogIndex, end: LogIndex) -> Result<Vec<LogEntry>> {
        Ok(slice_range(&self.entries, start, end))
    }

    fn last_index(&self) -> LogIndex {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn truncate_from(&mut self, from_index: LogIndex) -> Result<()> {
        if from_index == 0 {
            return Ok(());
        }
        let keep = (from_index - 1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
        }
        Ok(())
    }
}

/// File-backed log using bincode; the whole log is rewritten and fsynced
/// on every mutation so an acknowledged append is durable
pub struct FileLogStore {
    data_dir: PathBuf,
    entries: Vec<LogEntry>,
}

impl FileLogStore {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;

        let mut store = Self {
            data_dir,
            entries: Vec::new(),
        };
        store.load_from_disk()?;
        Ok(store)
    }

    fn log_file_path(&self) -> PathBuf {
        self.data_dir.join("log.bin")
    }

    fn load_from_disk(&mut self) -> Result<()> {
        let log_path = self.log_file_path();
        if !log_path.exists() {
            return Ok(());
        }

        let mut file = File::open(&log_path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        if buffer.is_empty() {
            return Ok(());
        }

        self.entries = bincode::deserialize(&buffer)?;
        tracing::info!("Loaded {} log entries from disk", self.entries.len());
        Ok(())
    }

    fn save_to_disk(&self) -> Result<()> {
        let encoded = bincode::serialize(&self.entries)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.log_file_path())?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }
}

impl LogStore for FileLogStore {
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in entries {
            check_contiguous(self.last_index(), &entry)?;
            self.entries.push(entry);
        }
        self.save_to_disk()
    }

    fn get(&self, index: LogIndex) -> Result<Option<LogEntry>> {
        if index == 0 {
            return Ok(None);
        }
        Ok(self.entries.get((index - 1) as usize).cloned())
    }

    fn get_range(&self, start: LogIndex, end: LogIndex) -> Result<Vec<LogEntry>> {
        Ok(slice_range(&self.entries, start, end))
    }

    fn last_index(&self) -> LogIndex {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn truncate_from(&mut self, from_index: LogIndex) -> Result<()> {
        if from_index == 0 {
            return Ok(());
        }
        let keep = (from_index - 1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
            self.save_to_disk()?;
            tracing::info!("Truncated log from index {}", from_index);
        }
        Ok(())
    }
}
