use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use machine_learning::ModelConfig;
use serde::Deserialize;
use swarm::SwarmConfig;
use worker::WorkerConfig;

const CONFIG_VAR: &str = "SWARM_CONFIG";
const DEFAULT_PATH: &str = "swarm.json";

/// Everything a node needs to start, read from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// A text file, or a directory of them.
    pub dataset: PathBuf,
    pub model: ModelConfig,
    pub worker: WorkerConfig,
    pub swarm: SwarmConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("data"),
            model: ModelConfig::default(),
            worker: WorkerConfig::default(),
            swarm: SwarmConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// The config path: the first argument, then `$SWARM_CONFIG`, then `swarm.json`.
pub fn path() -> PathBuf {
    env::args()
        .nth(1)
        .or_else(|| env::var(CONFIG_VAR).ok())
        .unwrap_or_else(|| DEFAULT_PATH.to_string())
        .into()
}
