use std::{num::NonZeroUsize, time::Duration};

use serde::Deserialize;

/// Admission and averaging settings of a swarm.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// The targets to admit at startup and periodically afterwards.
    pub targets: Vec<String>,
    /// How many workers may be under construction at once.
    pub admission_limit: NonZeroUsize,
    /// How many workers may be initializing at once.
    pub init_limit: NonZeroUsize,
    /// Whether to average parameters at all.
    pub averaging: bool,
    /// Whether to reshuffle the chunk order on every cycle instead of once.
    pub shuffle_cycles: bool,
    pub seed: Option<u64>,
    pub averaging_yield_ms: u64,
    pub idle_ms: u64,
    pub readmit_interval_ms: u64,
    pub round_timeout_ms: u64,
    pub round_timeout_per_worker_ms: u64,
    pub save_on_quit: bool,
    /// Minutes between lowest-loss autosaves, `0` disables them.
    pub autosave_minutes: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            targets: vec!["auto".into()],
            admission_limit: NonZeroUsize::new(3).unwrap_or(NonZeroUsize::MIN),
            init_limit: NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN),
            averaging: true,
            shuffle_cycles: true,
            seed: None,
            averaging_yield_ms: 10,
            idle_ms: 1_000,
            readmit_interval_ms: 60_000,
            round_timeout_ms: 10_000,
            round_timeout_per_worker_ms: 2_000,
            save_on_quit: true,
            autosave_minutes: 0,
        }
    }
}

impl SwarmConfig {
    /// The fixed part of the bound on each phase of a chunk exchange.
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// How much the bound on each phase grows per live worker.
    pub fn round_timeout_per_worker(&self) -> Duration {
        Duration::from_millis(self.round_timeout_per_worker_ms)
    }

    pub fn averaging_yield(&self) -> Duration {
        Duration::from_millis(self.averaging_yield_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn readmit_interval(&self) -> Duration {
        Duration::from_millis(self.readmit_interval_ms)
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_minutes > 0).then(|| Duration::from_secs(self.autosave_minutes * 60))
    }
}
