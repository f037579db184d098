//! Layered cluster configuration, grounded on
//! `iterations/v3/config/src/config.rs`'s `AppConfig` (a plain
//! `serde`-derived struct loaded through the `config` crate) but cut down
//! to the fields SimpliDFS actually has: cluster id, listen address,
//! replication factor, health thresholds, Raft timing, and the data
//! directory.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub replication_factor: usize,
    pub health_failure_threshold: u32,
    pub health_success_threshold: u32,
    pub health_cooldown_seconds: u64,
    pub raft_heartbeat_ms: u64,
    pub data_dir: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: "simplidfs".to_string(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 7700,
            replication_factor: 3,
            health_failure_threshold: 2,
            health_success_threshold: 3,
            health_cooldown_seconds: 15,
            raft_heartbeat_ms: 50,
            data_dir: "./data".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn health_cooldown(&self) -> Duration {
        Duration::from_secs(self.health_cooldown_seconds)
    }

    pub fn raft_heartbeat(&self) -> Duration {
        Duration::from_millis(self.raft_heartbeat_ms)
    }

    /// Layers defaults, an optional TOML file, then `SIMPLIDFS_*`
    /// environment overrides -- the same precedence order the teacher's
    /// `config` crate usage follows, minus the hot-reload machinery this
    /// workspace has no async runtime to drive.
    pub fn load(file_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&ClusterConfig::default())?,
        );
        if let Some(path) = file_path {
            debug!(path, "layering config file over defaults");
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("SIMPLIDFS").separator("_"));
        match builder.build()?.try_deserialize::<Self>() {
            Ok(cfg) => {
                debug!(cluster_id = %cfg.cluster_id, replication_factor = cfg.replication_factor, "cluster config loaded");
                Ok(cfg)
            }
            Err(e) => {
                warn!(error = %e, "cluster config failed to deserialize");
                Err(e)
            }
        }
    }
}
