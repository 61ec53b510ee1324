pub mod log_store;
pub mod state_store;

pub use log_store::{FileLogStore, LogStore, MemoryLogStore};
pub use state_store::{DurableState, FileStateStore, MemoryStateStore, StateStore};
