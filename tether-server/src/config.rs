use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tether_core::{
    DEFAULT_LISTENER_QUEUE_DEPTH, DEFAULT_SHUTDOWN_GRACE, Network, Result, TetherError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: Option<ManagerConfig>,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
}

/// Manager node: serves the attachment controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub bind_addr: String,
    /// SQLite file for cluster state. State is kept in memory when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NetworkConfig {
    pub fn to_network(&self) -> Network {
        let mut network = Network::new(self.id.trim(), self.name.clone());
        network.labels = self.labels.clone();
        network
    }
}

/// Worker node: talks to a manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub node_id: String,
    pub manager_addr: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_listener_queue_depth")]
    pub listener_queue_depth: usize,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_sync_interval_ms() -> u64 {
    2_000
}

fn default_listener_queue_depth() -> usize {
    DEFAULT_LISTENER_QUEUE_DEPTH
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE.as_millis() as u64
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("TETHER").separator("__"))
            .build()
            .map_err(|e| TetherError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| TetherError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn manager(&self) -> Result<&ManagerConfig> {
        let manager = self.manager.as_ref().ok_or_else(|| {
            TetherError::Config("manager section is required to run a manager".to_string())
        })?;

        if manager.bind_addr.trim().is_empty() {
            return Err(TetherError::Config(
                "manager bind_addr cannot be empty".to_string(),
            ));
        }

        if let Some(network) = manager.networks.iter().find(|n| n.id.trim().is_empty()) {
            return Err(TetherError::Config(format!(
                "network id cannot be empty (name: {:?})",
                network.name
            )));
        }

        Ok(manager)
    }

    pub fn agent(&self) -> Result<&AgentConfig> {
        let agent = self.agent.as_ref().ok_or_else(|| {
            TetherError::Config("agent section is required for node commands".to_string())
        })?;

        if agent.node_id.trim().is_empty() {
            return Err(TetherError::Config(
                "agent node_id cannot be empty".to_string(),
            ));
        }

        Ok(agent)
    }
}
