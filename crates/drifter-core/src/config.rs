use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// DrifterConfig
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from `drifter.toml`.
///
/// Every field carries a serde default so a partial (or missing) file yields
/// the reference configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DrifterConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Fixture node seeds consumed by the binary's static provider. The
    /// orchestrator core never reads these; node discovery always goes
    /// through a `NodeStatusProvider`.
    #[serde(default, rename = "nodes")]
    pub node_seeds: Vec<NodeSeed>,
}

impl DrifterConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

// ---------------------------------------------------------------------------
// OrchestratorConfig
// ---------------------------------------------------------------------------

/// Tunables for the per-cycle orchestration logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on a single registry refresh (seconds).
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    /// Completed-agent ring buffer capacity; oldest evicted beyond this.
    #[serde(default = "default_completed_cap")]
    pub completed_ring_cap: usize,
    /// Floor both stability and openness must exceed for a node to count
    /// as receptive.
    #[serde(default = "default_receptive_floor")]
    pub receptive_floor: f64,
    /// Optional cap on concurrently active agents. Unset means unbounded.
    #[serde(default)]
    pub max_active_agents: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            refresh_timeout_secs: default_refresh_timeout(),
            completed_ring_cap: default_completed_cap(),
            receptive_floor: default_receptive_floor(),
            max_active_agents: None,
        }
    }
}

// ---------------------------------------------------------------------------
// DaemonConfig
// ---------------------------------------------------------------------------

/// Background loop intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// How often the orchestrator cycle runs (seconds).
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeSeed
// ---------------------------------------------------------------------------

/// One `[[nodes]]` entry: a fixture snapshot for the binary's static
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSeed {
    pub id: String,
    #[serde(default = "default_node_kind")]
    pub kind: String,
    #[serde(default)]
    pub stability: f64,
    #[serde(default)]
    pub openness: f64,
    #[serde(default)]
    pub alignment: f64,
}

fn default_cycle_interval() -> u64 {
    2
}

fn default_refresh_timeout() -> u64 {
    5
}

fn default_completed_cap() -> usize {
    1000
}

fn default_receptive_floor() -> f64 {
    0.2
}

fn default_node_kind() -> String {
    "generic".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
