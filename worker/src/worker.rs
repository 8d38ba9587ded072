use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, error, info};
use machine_learning::{Batch, ComputeEngine, ComputeErr, Liveness, Sampler, VariableSpec};
use parking_lot::Mutex;
use tokio::{sync::OnceCell, task, task::JoinHandle, time};

use super::Result;
use crate::{
    checkpoint::CheckpointManager,
    chunks::{self, Chunk},
    config::WorkerConfig,
    counter::StepCounter,
    error::WorkerErr,
    state::WorkerState,
    stats::{StepReport, Stats},
};

/// How often a paused step loop checks whether it was resumed.
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// A point-in-time view of a worker, for status output and checkpoint selection.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub target: String,
    pub state: WorkerState,
    /// Unix seconds at the last statistics reset.
    pub started_at: u64,
    pub elapsed: Duration,
    pub step: u64,
    pub loss: f64,
    pub perplexity: f64,
    /// The loss EMA denominator, grows with the amount of steps taken.
    pub ticks: f64,
}

/// One training participant: a compute engine, its parameter set, and a step loop.
pub struct Worker {
    target: String,
    config: Arc<WorkerConfig>,
    engine: Arc<dyn ComputeEngine>,
    sampler: Arc<dyn Sampler>,
    counter: Arc<StepCounter>,
    checkpoints: Arc<CheckpointManager>,
    chunks: Vec<Chunk>,
    state: Mutex<WorkerState>,
    initialized: OnceCell<()>,
    stopped: AtomicBool,
    step: AtomicU64,
    stats: Mutex<Stats>,
    created_at: Instant,
}

impl Worker {
    /// Creates a new worker in the `Starting` state.
    ///
    /// # Args
    /// * `target` - The unique identity of this worker, e.g. a device.
    /// * `config` - The training and persistence settings.
    /// * `engine` - The compute engine, not initialized yet.
    /// * `sampler` - Where training batches are drawn from.
    /// * `counter` - The process-wide step counter.
    /// * `checkpoints` - The checkpoint manager used to restore on initialization.
    ///
    /// # Returns
    /// A new worker instance.
    pub fn new(
        target: impl Into<String>,
        config: Arc<WorkerConfig>,
        engine: Arc<dyn ComputeEngine>,
        sampler: Arc<dyn Sampler>,
        counter: Arc<StepCounter>,
        checkpoints: Arc<CheckpointManager>,
    ) -> Self {
        let chunks = chunks::partition(engine.variables(), config.chunk_size);
        let step = counter.get();

        Self {
            target: target.into(),
            config,
            engine,
            sampler,
            counter,
            checkpoints,
            chunks,
            state: Mutex::new(WorkerState::Starting),
            initialized: OnceCell::new(),
            stopped: AtomicBool::new(false),
            step: AtomicU64::new(step),
            stats: Mutex::new(Stats::new()),
            created_at: Instant::now(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn variables(&self) -> &[VariableSpec] {
        self.engine.variables()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    pub fn is_fresh(&self) -> bool {
        self.state().is_fresh()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == WorkerState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.state() == WorkerState::Dead
    }

    /// The global step this worker will train on next.
    pub fn current_step(&self) -> u64 {
        self.step.load(Ordering::Acquire)
    }

    /// Time since this worker was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Moves to `next` if the lifecycle allows it.
    ///
    /// # Returns
    /// Whether the transition happened.
    fn transition(&self, next: WorkerState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return false;
        }

        debug!(device = self.target.as_str(); "{} -> {next}", *state);
        *state = next;
        true
    }

    /// Marks the worker as having taken part in a full averaging cycle.
    ///
    /// Only a `Fresh` worker changes state, a paused one stays paused.
    ///
    /// # Returns
    /// Whether the worker was fresh.
    pub fn clear_fresh(&self) -> bool {
        let mut state = self.state.lock();
        if *state != WorkerState::Fresh {
            return false;
        }

        debug!(device = self.target.as_str(); "{} -> {}", *state, WorkerState::Active);
        *state = WorkerState::Active;
        true
    }

    /// Suspends the step loop, the worker keeps taking part in averaging.
    pub fn pause(&self) -> bool {
        self.transition(WorkerState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.is_paused() && self.transition(WorkerState::Active)
    }

    /// Stops the step loop for good, the worker is `Dead` from now on.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if self.transition(WorkerState::Dead) {
            info!(device = self.target.as_str(); "stopped");
        }
    }

    fn kill(&self, err: &WorkerErr) {
        self.stopped.store(true, Ordering::Release);
        if self.transition(WorkerState::Dead) {
            error!(device = self.target.as_str(); "worker died: {err}");
        }
    }

    /// Checks whether the compute context is still usable, marking the worker `Dead` otherwise.
    ///
    /// # Returns
    /// Whether the worker is alive after the probe.
    pub fn probe(&self) -> bool {
        if self.is_alive() && self.engine.probe() == Liveness::Aborted {
            self.kill(&WorkerErr::Compute(ComputeErr::Aborted));
        }

        self.is_alive()
    }

    /// Initializes the compute engine and restores the latest checkpoint.
    ///
    /// Only the first call does any work, later calls return right away. On success the
    /// worker is `Fresh`, on failure it's `Dead`.
    pub async fn initialize(&self) -> Result<()> {
        match self.initialized.get_or_try_init(|| self.init_once()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.kill(&e);
                Err(e)
            }
        }
    }

    async fn init_once(&self) -> Result<()> {
        self.say("Initializing...");

        let engine = Arc::clone(&self.engine);
        let deadline = self.config.deadlines.initialize();
        blocking(move || engine.initialize(deadline)).await?;

        if !self.config.fresh_model {
            self.checkpoints.restore(self, None).await?;
        }

        self.reset_stats();
        self.transition(WorkerState::Fresh);
        self.say("Initialized.");
        Ok(())
    }

    /// Runs a single training step.
    ///
    /// Any failure leaves the worker `Dead`.
    ///
    /// # Returns
    /// The loss observed on the step.
    pub async fn step(&self) -> Result<f32> {
        match self.try_step().await {
            Ok(loss) => Ok(loss),
            Err(e) => {
                self.kill(&e);
                Err(e)
            }
        }
    }

    async fn try_step(&self) -> Result<f32> {
        self.initialize().await?;

        let step = self.current_step();
        let hyper = self.config.hyperparams(step);
        let batch_size = self.config.batch_size.get();
        let sample_ctx = self.config.sample_ctx.get();
        let deadline = self.config.deadlines.step();

        let engine = Arc::clone(&self.engine);
        let sampler = Arc::clone(&self.sampler);
        let loss = blocking(move || {
            let batch: Batch = (0..batch_size).map(|_| sampler.sample(sample_ctx)).collect();
            engine.run_step(&batch, hyper, deadline)
        })
        .await?;

        let report = self.stats.lock().record(loss);
        self.print_step(step, &report, hyper.learning_rate, hyper.weight_decay);

        let next = self.counter.incr();
        self.step.store(next, Ordering::Release);
        Ok(loss)
    }

    fn print_step(&self, step: u64, report: &StepReport, rate: f32, decay: f32) {
        let delta = report.delta.as_secs_f64();
        let tokens_per_sec = if delta > 0. {
            self.config.tokens_per_step() as f64 / delta
        } else {
            0.
        };

        info!(
            device = self.target.as_str();
            "[{step} | {:.4} | {delta:.2}s | {tokens_per_sec:.2} tokens/s] loss={:.4} perp={:.4} avgloss={:.4} avgperp={:.4} rate={rate:.7} decay={decay:.7} step={step}",
            report.elapsed.as_secs_f64(),
            report.loss,
            report.perplexity,
            report.avg_loss,
            report.avg_perplexity,
        );
    }

    /// Trains until the worker is stopped or dies, idling while paused.
    pub async fn run_loop(self: Arc<Self>) {
        while !self.is_stopped() {
            if self.is_paused() {
                time::sleep(PAUSE_POLL).await;
                continue;
            }

            if self.step().await.is_err() {
                break;
            }

            time::sleep(self.config.idle_yield()).await;
        }

        debug!(device = self.target.as_str(); "step loop finished");
    }

    /// Starts the step loop on its own task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_loop())
    }

    fn chunk(&self, index: usize) -> Result<&Chunk> {
        self.chunks.get(index).ok_or(WorkerErr::ChunkOutOfRange {
            chunk: index,
            chunks: self.chunks.len(),
        })
    }

    /// Copies the current values of a chunk out of the engine.
    ///
    /// # Args
    /// * `index` - The chunk index.
    ///
    /// # Returns
    /// The chunk's `(name, value)` pairs in chunk order.
    pub async fn parameters_for_chunk(&self, index: usize) -> Result<Vec<(String, Vec<f32>)>> {
        let names = self.chunk(index)?.names.clone();
        let values = self.read(names.clone()).await?;
        Ok(names.into_iter().zip(values).collect())
    }

    /// Overwrites the values of a chunk.
    ///
    /// # Args
    /// * `index` - The chunk index.
    /// * `values` - One value per chunk variable, in chunk order.
    pub async fn apply_chunk(&self, index: usize, values: Vec<Vec<f32>>) -> Result<()> {
        let chunk = self.chunk(index)?;
        if values.len() != chunk.names.len() {
            return Err(WorkerErr::ChunkShapeMismatch {
                chunk: index,
                got: values.len(),
                expected: chunk.names.len(),
            });
        }

        self.write(chunk.names.clone(), values).await
    }

    /// Reads every variable of the engine, in declaration order.
    pub async fn read_all(&self) -> Result<Vec<(VariableSpec, Vec<f32>)>> {
        let specs = self.variables().to_vec();
        let names = specs.iter().map(|s| s.name.clone()).collect();
        let values = self.read(names).await?;
        Ok(specs.into_iter().zip(values).collect())
    }

    /// Overwrites the given variables.
    pub async fn write_named(&self, names: Vec<String>, values: Vec<Vec<f32>>) -> Result<()> {
        self.write(names, values).await
    }

    async fn read(&self, names: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.state() == WorkerState::Starting {
            return Err(WorkerErr::NotInitialized);
        }

        let engine = Arc::clone(&self.engine);
        let deadline = self.config.deadlines.read();
        let result = blocking(move || engine.read(&names, deadline)).await;
        self.check_fatal(result)
    }

    async fn write(&self, names: Vec<String>, values: Vec<Vec<f32>>) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let deadline = self.config.deadlines.write();
        let result = blocking(move || engine.write(&names, &values, deadline)).await;
        self.check_fatal(result)
    }

    fn check_fatal<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.kill(e);
            }
        }

        result
    }

    /// Resets loss and perplexity statistics and the step clock.
    pub fn reset_stats(&self) {
        *self.stats.lock() = Stats::new();
    }

    pub fn status(&self) -> WorkerStatus {
        let stats = self.stats.lock();

        WorkerStatus {
            target: self.target.clone(),
            state: self.state(),
            started_at: stats.started_at(),
            elapsed: stats.elapsed(),
            step: self.current_step(),
            loss: stats.loss.value(),
            perplexity: stats.perplexity.value(),
            ticks: stats.loss.denominator,
        }
    }

    /// Running loss, `0` before the first step.
    pub fn running_loss(&self) -> f64 {
        self.stats.lock().loss.value()
    }

    /// The loss EMA denominator.
    pub fn ticks(&self) -> f64 {
        self.stats.lock().loss.denominator
    }

    fn say(&self, msg: &str) {
        info!(
            device = self.target.as_str();
            "[{} | {:.4}] {msg}",
            self.current_step(),
            self.stats.lock().uptime().as_secs_f64()
        );
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("target", &self.target)
            .field("state", &self.state())
            .field("step", &self.current_step())
            .finish_non_exhaustive()
    }
}

/// Runs a blocking engine call off the async executor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> machine_learning::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(f).await {
        Ok(result) => Ok(result?),
        // a panicking engine call leaves the context unusable
        Err(_) => Err(WorkerErr::Compute(ComputeErr::Aborted)),
    }
}
