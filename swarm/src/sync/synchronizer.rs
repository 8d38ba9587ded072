use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use log::{debug, warn};
use tokio::{task::JoinSet, time};
use worker::{Worker, WorkerErr};

use super::Accumulator;
use crate::{config::SwarmConfig, error::Result};

/// What happened during a single chunk exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkReport {
    /// Workers whose values made it into the mean.
    pub reporters: usize,
    /// Workers the mean was written to within the deadline.
    pub applied: usize,
}

/// Averages chunks of parameters across the live workers.
///
/// Every exchange is a gather phase, where non-fresh workers report their values, and a
/// broadcast phase, where the mean is written to every live worker. Each phase is bounded
/// by a timeout, stragglers are left running but their results are ignored.
pub struct Synchronizer {
    base_timeout: Duration,
    per_worker_timeout: Duration,
    generation: Arc<AtomicU64>,
}

impl Synchronizer {
    /// Creates a new `Synchronizer`.
    ///
    /// # Arguments
    /// * `base_timeout` - The fixed part of a phase's timeout.
    /// * `per_worker_timeout` - How much a phase's timeout grows per live worker.
    pub fn new(base_timeout: Duration, per_worker_timeout: Duration) -> Self {
        Self {
            base_timeout,
            per_worker_timeout,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(config.round_timeout(), config.round_timeout_per_worker())
    }

    fn timeout(&self, workers: usize) -> Duration {
        self.base_timeout + self.per_worker_timeout * workers as u32
    }

    /// Averages one chunk across `workers`.
    ///
    /// # Arguments
    /// * `chunk` - The chunk index.
    /// * `workers` - The live workers.
    ///
    /// # Returns
    /// How many workers reported and received the mean, or `ZeroReporters` if some
    /// variable of the chunk was reported by nobody.
    pub async fn sync_chunk(&self, chunk: usize, workers: &[Arc<Worker>]) -> Result<ChunkReport> {
        let round = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let Some(first) = workers.first() else {
            return Ok(ChunkReport::default());
        };
        let names = first
            .chunks()
            .get(chunk)
            .ok_or(WorkerErr::ChunkOutOfRange {
                chunk,
                chunks: first.num_chunks(),
            })?
            .names
            .clone();

        let timeout = self.timeout(workers.len());
        let accumulator = Arc::new(Accumulator::new());

        let gatherers = self.gather(chunk, workers, &accumulator, timeout).await;
        if gatherers == 0 {
            // every live worker is fresh, there's nothing to average yet
            debug!("chunk {chunk}: no workers to gather from");
            return Ok(ChunkReport::default());
        }

        let reporters = names
            .first()
            .map_or(0, |name| accumulator.count(name));
        let means = Arc::new(accumulator.seal(chunk, &names)?);

        let applied = self.broadcast(round, chunk, workers, means, timeout).await;

        debug!("chunk {chunk}: {reporters}/{gatherers} reported, {applied}/{} applied", workers.len());
        Ok(ChunkReport { reporters, applied })
    }

    /// Folds the chunk values of every non-fresh worker into `accumulator`.
    ///
    /// # Returns
    /// The amount of workers asked to report.
    async fn gather(
        &self,
        chunk: usize,
        workers: &[Arc<Worker>],
        accumulator: &Arc<Accumulator>,
        timeout: Duration,
    ) -> usize {
        let mut tasks = JoinSet::new();

        for worker in workers.iter().filter(|w| w.is_alive() && !w.is_fresh()) {
            let worker = Arc::clone(worker);
            let accumulator = Arc::clone(accumulator);

            tasks.spawn(async move {
                match worker.parameters_for_chunk(chunk).await {
                    Ok(params) => {
                        if !accumulator.fold(params) {
                            debug!(device = worker.target(); "discarding late values of chunk {chunk}");
                        }
                    }
                    Err(e) => warn!(device = worker.target(); "failed to read chunk {chunk}: {e}"),
                }
            });
        }

        let gatherers = tasks.len();
        if time::timeout(timeout, async { while tasks.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            debug!("chunk {chunk}: gather timed out, abandoning stragglers");
        }
        tasks.detach_all();

        gatherers
    }

    /// Writes `means` into the chunk of every live worker.
    ///
    /// # Returns
    /// The amount of workers that applied the means in time.
    async fn broadcast(
        &self,
        round: u64,
        chunk: usize,
        workers: &[Arc<Worker>],
        means: Arc<Vec<Vec<f32>>>,
        timeout: Duration,
    ) -> usize {
        let mut tasks = JoinSet::new();

        for worker in workers.iter().filter(|w| w.is_alive()) {
            let worker = Arc::clone(worker);
            let means = Arc::clone(&means);
            let generation = Arc::clone(&self.generation);

            tasks.spawn(async move {
                if generation.load(Ordering::Acquire) != round {
                    debug!(device = worker.target(); "skipping stale write of chunk {chunk}");
                    return false;
                }

                match worker.apply_chunk(chunk, means.to_vec()).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(device = worker.target(); "failed to write chunk {chunk}: {e}");
                        false
                    }
                }
            });
        }

        let mut applied = 0;
        let wait = async {
            while let Some(result) = tasks.join_next().await {
                if matches!(result, Ok(true)) {
                    applied += 1;
                }
            }
        };

        if time::timeout(timeout, wait).await.is_err() {
            debug!("chunk {chunk}: broadcast timed out, abandoning stragglers");
        }
        tasks.detach_all();

        applied
    }
}
