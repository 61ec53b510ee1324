use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::errors::{RaftError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Unique identifier for this replica
    pub node_id: String,

    /// Minimum election timeout in milliseconds
    pub election_timeout_min_ms: u64,

    /// Width of the randomization window in milliseconds; the effective
    /// timeout is drawn fresh from [min, min + window) on every reset
    pub election_timeout_window_ms: u64,

    /// Heartbeat interval in milliseconds.
    /// Must be much less than the election timeout minimum
    pub heartbeat_interval_ms: u64,

    /// Directory for durable term/vote/log files
    pub data_dir: PathBuf,
}

impl ReplicaConfig {
    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms + self.election_timeout_window_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(RaftError::InvalidConfig("node_id cannot be empty".into()));
        }

        if self.election_timeout_window_ms == 0 {
            return Err(RaftError::InvalidConfig(
                "election_timeout_window must be non-zero, or every replica times out in lockstep"
                    .into(),
            ));
        }

        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(RaftError::InvalidConfig(
                "heartbeat_interval must be less than election_timeout_min".into(),
            ));
        }

        Ok(())
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            node_id: "replica-0".to_string(),
            election_timeout_min_ms: 150,
            election_timeout_window_ms: 150,
            heartbeat_interval_ms: 100,
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Full node configuration: this replica plus the cluster it belongs to
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub replica: ReplicaConfig,
    /// Every replica id in the cluster, including this one
    pub peers: Vec<String>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Config =
            serde_json::from_str(&raw).map_err(|e| RaftError::InvalidConfig(e.to_string()))?;
        config.replica.validate()?;
        Ok(config)
    }
}
