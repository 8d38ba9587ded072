use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use log::{info, warn};
use tokio::{fs, task};

use super::{Checkpoint, CheckpointErr, CheckpointHandle, CheckpointStore, Tensor};
use crate::{
    config::{RestoreFrom, WorkerConfig, counter_path},
    error::{Result, WorkerErr},
    worker::Worker,
};

/// How `save_best` orders its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
    /// Ascending running loss.
    LowestLoss,
    /// Longest running first, by descending EMA denominator.
    MostStable,
}

/// Persists and restores worker parameter sets and the global step.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    run_dir: PathBuf,
    base_dir: PathBuf,
    restore_from: RestoreFrom,
    truncate_weights: bool,
}

impl CheckpointManager {
    /// Creates a new `CheckpointManager`.
    ///
    /// # Args
    /// * `store` - The persistence backend.
    /// * `config` - Where the run and base model checkpoints live and how to restore.
    pub fn new(store: Arc<dyn CheckpointStore>, config: &WorkerConfig) -> Self {
        Self {
            store,
            run_dir: config.run_dir(),
            base_dir: config.base_model_dir(),
            restore_from: config.restore_from.clone(),
            truncate_weights: config.truncate_weights,
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Saves a worker's full parameter set and its current step.
    ///
    /// Fresh and dead workers are skipped.
    ///
    /// # Returns
    /// Whether a checkpoint was written.
    pub async fn save(&self, worker: &Worker) -> Result<bool> {
        if !worker.is_alive() || worker.is_fresh() {
            return Ok(false);
        }

        let step = worker.current_step();
        info!(device = worker.target(); "Saving {} step {step}", self.run_dir.display());
        let start = Instant::now();

        let tensors = worker
            .read_all()
            .await?
            .into_iter()
            .map(|(spec, data)| {
                let tensor = Tensor {
                    shape: spec.shape,
                    data,
                };
                (spec.name, tensor)
            })
            .collect();
        let checkpoint = Checkpoint { step, tensors };

        let store = Arc::clone(&self.store);
        let dir = self.run_dir.clone();
        let handle = task::spawn_blocking(move || store.save(&dir, &checkpoint))
            .await
            .map_err(io::Error::other)??;

        fs::write(counter_path(&self.run_dir), format!("{step}\n")).await?;

        info!(
            device = worker.target();
            "Saved {} in {:.3} seconds",
            handle.path.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(true)
    }

    /// Saves the first worker that can be saved, in policy order.
    ///
    /// # Args
    /// * `workers` - The candidates.
    /// * `policy` - How to rank them.
    ///
    /// # Returns
    /// The saved worker, or `None` if no candidate could be saved.
    pub async fn save_best(
        &self,
        workers: &[Arc<Worker>],
        policy: SavePolicy,
    ) -> Option<Arc<Worker>> {
        for worker in rank(workers, policy) {
            match self.save(&worker).await {
                Ok(true) => return Some(worker),
                Ok(false) => {}
                Err(e) => warn!(device = worker.target(); "failed to save: {e}"),
            }
        }

        None
    }

    /// Restores a worker's parameters.
    ///
    /// Variables missing from the checkpoint keep their current value. A variable whose
    /// shape differs fails the restore unless weight truncation is enabled, in which case
    /// it's skipped.
    ///
    /// # Args
    /// * `worker` - The worker to restore.
    /// * `checkpoint` - An explicit checkpoint path overriding the restore policy.
    ///
    /// # Returns
    /// Whether a checkpoint was found and loaded.
    pub async fn restore(&self, worker: &Worker, checkpoint: Option<&Path>) -> Result<bool> {
        let Some(handle) = self.resolve(checkpoint)? else {
            warn!(device = worker.target(); "no checkpoint found, keeping initial weights");
            return Ok(false);
        };

        info!(device = worker.target(); "Restoring from {}", handle.path.display());

        let store = Arc::clone(&self.store);
        let loaded = task::spawn_blocking(move || store.load(&handle))
            .await
            .map_err(io::Error::other)??;

        let (names, values) = self.matching(worker, loaded.tensors)?;
        worker.write_named(names, values).await?;
        worker.reset_stats();

        info!(device = worker.target(); "Restored step {}", loaded.step);
        Ok(true)
    }

    fn resolve(&self, checkpoint: Option<&Path>) -> Result<Option<CheckpointHandle>> {
        if let Some(path) = checkpoint {
            return Ok(self.store.resolve(path)?);
        }

        let handle = match &self.restore_from {
            RestoreFrom::Latest => match self.store.latest(&self.run_dir)? {
                Some(handle) => Some(handle),
                None => self.store.latest(&self.base_dir)?,
            },
            RestoreFrom::Fresh => self.store.latest(&self.base_dir)?,
            RestoreFrom::Path(path) => self.store.resolve(path)?,
        };

        Ok(handle)
    }

    /// Pairs the worker's variables with the checkpoint tensors of the same name.
    fn matching(
        &self,
        worker: &Worker,
        mut tensors: BTreeMap<String, Tensor>,
    ) -> Result<(Vec<String>, Vec<Vec<f32>>)> {
        let mut names = Vec::new();
        let mut values = Vec::new();

        for spec in worker.variables() {
            let Some(tensor) = tensors.remove(&spec.name) else {
                warn!(device = worker.target(); "{} missing from checkpoint", spec.name);
                continue;
            };

            if tensor.shape != spec.shape || tensor.data.len() != spec.len() {
                if !self.truncate_weights {
                    return Err(WorkerErr::Checkpoint(CheckpointErr::ShapeMismatch {
                        name: spec.name.clone(),
                        got: tensor.shape,
                        expected: spec.shape.clone(),
                    }));
                }

                warn!(
                    device = worker.target();
                    "skipping {}: checkpoint shape {:?}, model shape {:?}",
                    spec.name,
                    tensor.shape,
                    spec.shape
                );
                continue;
            }

            names.push(spec.name.clone());
            values.push(tensor.data);
        }

        Ok((names, values))
    }
}

fn rank(workers: &[Arc<Worker>], policy: SavePolicy) -> Vec<Arc<Worker>> {
    let mut ranked: Vec<_> = workers
        .iter()
        .map(|w| {
            let status = w.status();
            (Arc::clone(w), status.loss, status.ticks)
        })
        .collect();

    match policy {
        SavePolicy::LowestLoss => ranked.sort_by(|a, b| a.1.total_cmp(&b.1)),
        SavePolicy::MostStable => ranked.sort_by(|a, b| b.2.total_cmp(&a.2)),
    }

    ranked.into_iter().map(|(w, ..)| w).collect()
}

/// Reads the last persisted global step of a run.
///
/// # Returns
/// The step, or `None` if the run never saved.
pub fn read_counter(run_dir: &Path) -> io::Result<Option<u64>> {
    let text = match std::fs::read_to_string(counter_path(run_dir)) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    text.trim()
        .parse()
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
