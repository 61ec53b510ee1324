pub mod config;
pub mod kv;
pub mod raft;
pub mod storage;
pub mod transport;
pub mod util;
