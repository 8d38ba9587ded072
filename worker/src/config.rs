use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use machine_learning::{Hyperparams, LrSchedule};
use serde::Deserialize;

/// Where a worker's initial weights come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum RestoreFrom {
    /// The run's latest checkpoint, falling back to the base model.
    #[default]
    Latest,
    /// The base model only.
    Fresh,
    /// A checkpoint file or a directory of checkpoints.
    Path(PathBuf),
}

impl From<String> for RestoreFrom {
    fn from(value: String) -> Self {
        match value.as_str() {
            "latest" => Self::Latest,
            "fresh" => Self::Fresh,
            _ => Self::Path(PathBuf::from(value)),
        }
    }
}

/// Deadlines of the compute engine calls, in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Deadlines {
    pub initialize_ms: u64,
    pub step_ms: u64,
    pub read_ms: u64,
    pub write_ms: u64,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            initialize_ms: 60_000,
            step_ms: 600_000,
            read_ms: 30_000,
            write_ms: 30_000,
        }
    }
}

impl Deadlines {
    pub fn initialize(&self) -> Duration {
        Duration::from_millis(self.initialize_ms)
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

/// The training and persistence settings shared by every worker of a node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub run_name: String,
    pub checkpoint_dir: PathBuf,
    pub models_dir: PathBuf,
    pub model_name: String,
    pub batch_size: NonZeroUsize,
    pub sample_ctx: NonZeroUsize,
    pub learning_rate: f32,
    pub schedule: LrSchedule,
    pub weight_decay: f32,
    pub restore_from: RestoreFrom,
    pub fresh_model: bool,
    pub truncate_weights: bool,
    pub max_to_keep: usize,
    /// The element threshold of a parameter chunk.
    pub chunk_size: NonZeroUsize,
    pub use_global_sampler: bool,
    pub idle_yield_ms: u64,
    pub deadlines: Deadlines,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            run_name: "run1".into(),
            checkpoint_dir: PathBuf::from("checkpoint"),
            models_dir: PathBuf::from("models"),
            model_name: "bigram".into(),
            batch_size: NonZeroUsize::new(8).unwrap_or(NonZeroUsize::MIN),
            sample_ctx: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
            learning_rate: 1e-3,
            schedule: LrSchedule::Constant,
            weight_decay: 0.,
            restore_from: RestoreFrom::Latest,
            fresh_model: false,
            truncate_weights: false,
            max_to_keep: 5,
            chunk_size: NonZeroUsize::new(1 << 20).unwrap_or(NonZeroUsize::MIN),
            use_global_sampler: false,
            idle_yield_ms: 1,
            deadlines: Deadlines::default(),
        }
    }
}

impl WorkerConfig {
    /// The directory holding this run's checkpoints and counter file.
    pub fn run_dir(&self) -> PathBuf {
        self.checkpoint_dir.join(&self.run_name)
    }

    /// The directory of the base model checkpoints.
    pub fn base_model_dir(&self) -> PathBuf {
        self.models_dir.join(&self.model_name)
    }

    /// Computes the hyperparameters of a step.
    ///
    /// # Arguments
    /// * `step` - The global step.
    pub fn hyperparams(&self, step: u64) -> Hyperparams {
        Hyperparams {
            learning_rate: self.schedule.rate(self.learning_rate, step),
            weight_decay: self.weight_decay,
        }
    }

    pub fn idle_yield(&self) -> Duration {
        Duration::from_millis(self.idle_yield_ms)
    }

    /// The amount of tokens consumed by a single step.
    pub fn tokens_per_step(&self) -> usize {
        self.batch_size.get() * self.sample_ctx.get()
    }
}

pub(crate) fn counter_path(run_dir: &Path) -> PathBuf {
    run_dir.join("counter")
}
