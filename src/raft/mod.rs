pub mod actor;
pub mod election;
pub mod replication;
pub mod rpc;
pub mod state;
pub mod types;
