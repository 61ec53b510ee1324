use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::raft::types::{NodeId, Term};
use crate::util::errors::Result;

/// The slice of replica state that must survive crashes: a replica may never
/// vote twice in one term or forget a term it has acknowledged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DurableState {
    /// Latest term this replica has seen (initialized to 0)
    pub current_term: Term,
    /// Candidate that received our vote in the current term (or None)
    pub voted_for: Option<NodeId>,
}

/// Durability seam for term and vote. Written before the corresponding
/// RPC response is sent
pub trait StateStore: Send {
    fn save_term(&mut self, term: Term) -> Result<()>;
    fn save_voted_for(&mut self, peer_id: Option<NodeId>) -> Result<()>;
    fn load(&self) -> Result<DurableState>;
}

/// No-durability store for in-process clusters and tests
#[derive(Default)]
pub struct MemoryStateStore {
    state: DurableState,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn save_term(&mut self, term: Term) -> Result<()> {
        self.state.current_term = term;
        Ok(())
    }

    fn save_voted_for(&mut self, peer_id: Option<NodeId>) -> Result<()> {
        self.state.voted_for = peer_id;
        Ok(())
    }

    fn load(&self) -> Result<DurableState> {
        Ok(self.state.clone())
    }
}

/// File-backed store, fsynced on every save
pub struct FileStateStore {
    data_dir: PathBuf,
    state: DurableState,
}

impl FileStateStore {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;

        let mut store = Self {
            data_dir,
            state: DurableState::default(),
        };
        store.state = store.load_from_disk()?;
        Ok(store)
    }

    fn state_file_path(&self) -> PathBuf {
        self.data_dir.join("state.bin")
    }

    fn load_from_disk(&self) -> Result<DurableState> {
        let state_path = self.state_file_path();
        if !state_path.exists() {
            return Ok(DurableState::default());
        }

        let mut file = File::open(&state_path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        if buffer.is_empty() {
            return Ok(DurableState::default());
        }

        let state: DurableState = bincode::deserialize(&buffer)?;
        tracing::info!(
            "Loaded durable state: term={}, voted_for={:?}",
            state.current_term,
            state.voted_for
        );
        Ok(state)
    }

    fn save_to_disk(&self) -> Result<()> {
        let encoded = bincode::serialize(&self.state)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.state_file_path())?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn save_term(&mut self, term: Term) -> Result<()> {
        self.state.current_term = term;
        self.save_to_disk()
    }

    fn save_voted_for(&mut self, peer_id: Option<NodeId>) -> Result<()> {
        self.state.voted_for = peer_id;
        self.save_to_disk()
    }

    fn load(&self) -> Result<DurableState> {
        Ok(self.state.clone())
    }
}
