use std::{io, sync::Arc};

use machine_learning::{EngineFactory, Sampler};
use tokio::task;

use crate::{
    Result, Worker, checkpoint::CheckpointManager, config::WorkerConfig, counter::StepCounter,
    error::WorkerErr,
};

/// Builds a data sampler for a worker.
pub type SamplerFactory = Arc<dyn Fn() -> io::Result<Arc<dyn Sampler>> + Send + Sync>;

/// Builds workers sharing a configuration, a step counter and a checkpoint manager.
pub struct WorkerBuilder {
    config: Arc<WorkerConfig>,
    engines: Arc<dyn EngineFactory>,
    samplers: SamplerFactory,
    global_sampler: Option<Arc<dyn Sampler>>,
    counter: Arc<StepCounter>,
    checkpoints: Arc<CheckpointManager>,
}

impl WorkerBuilder {
    /// Creates a new `WorkerBuilder`.
    ///
    /// # Args
    /// * `config` - The settings every built worker shares.
    /// * `engines` - Allocates the compute context of a target.
    /// * `samplers` - Builds a data sampler, called once if the global sampler is used.
    /// * `counter` - The process-wide step counter.
    /// * `checkpoints` - The checkpoint manager.
    ///
    /// # Returns
    /// The builder, or an io error if the global sampler couldn't be built.
    pub fn new(
        config: Arc<WorkerConfig>,
        engines: Arc<dyn EngineFactory>,
        samplers: SamplerFactory,
        counter: Arc<StepCounter>,
        checkpoints: Arc<CheckpointManager>,
    ) -> io::Result<Self> {
        let global_sampler = if config.use_global_sampler {
            Some(samplers()?)
        } else {
            None
        };

        Ok(Self {
            config,
            engines,
            samplers,
            global_sampler,
            counter,
            checkpoints,
        })
    }

    pub fn config(&self) -> &Arc<WorkerConfig> {
        &self.config
    }

    pub fn counter(&self) -> &Arc<StepCounter> {
        &self.counter
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// Allocates a compute context for `target` and wraps it in a `Starting` worker.
    ///
    /// # Args
    /// * `target` - The worker's identity.
    ///
    /// # Returns
    /// The new, uninitialized worker.
    pub async fn build(&self, target: &str) -> Result<Arc<Worker>> {
        let engines = Arc::clone(&self.engines);
        let owned = target.to_string();
        let engine = task::spawn_blocking(move || engines.connect(&owned))
            .await
            .map_err(io::Error::other)??;

        let sampler = match &self.global_sampler {
            Some(sampler) => Arc::clone(sampler),
            None => {
                let samplers = Arc::clone(&self.samplers);
                task::spawn_blocking(move || samplers())
                    .await
                    .map_err(io::Error::other)?
                    .map_err(WorkerErr::Io)?
            }
        };

        Ok(Arc::new(Worker::new(
            target,
            Arc::clone(&self.config),
            engine,
            sampler,
            Arc::clone(&self.counter),
            Arc::clone(&self.checkpoints),
        )))
    }
}
