use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::future;
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use worker::{CheckpointManager, Worker, WorkerBuilder, WorkerConfig};

use crate::{
    config::SwarmConfig,
    error::{Result, SwarmErr},
};

#[derive(Default)]
struct Registry {
    workers: Vec<Arc<Worker>>,
    pending: HashSet<String>,
}

/// The set of workers training together, and the gate new workers go through.
pub struct Swarm {
    builder: WorkerBuilder,
    registry: Mutex<Registry>,
    admission: Semaphore,
    init: Semaphore,
    starting: AtomicUsize,
}

impl Swarm {
    /// Creates a new, empty `Swarm`.
    ///
    /// # Arguments
    /// * `builder` - Builds the workers of admitted targets.
    /// * `config` - The admission limits.
    pub fn new(builder: WorkerBuilder, config: &SwarmConfig) -> Arc<Self> {
        Arc::new(Self {
            builder,
            registry: Mutex::new(Registry::default()),
            admission: Semaphore::new(config.admission_limit.get()),
            init: Semaphore::new(config.init_limit.get()),
            starting: AtomicUsize::new(0),
        })
    }

    pub fn worker_config(&self) -> &WorkerConfig {
        self.builder.config()
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        self.builder.checkpoints()
    }

    /// Every registered worker, including the ones that died since the last admission.
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.registry.lock().workers.clone()
    }

    pub fn live_workers(&self) -> Vec<Arc<Worker>> {
        self.registry
            .lock()
            .workers
            .iter()
            .filter(|w| w.is_alive())
            .cloned()
            .collect()
    }

    /// The amount of workers under construction right now.
    pub fn starting(&self) -> usize {
        self.starting.load(Ordering::Acquire)
    }

    pub fn is_pending(&self, target: &str) -> bool {
        self.registry.lock().pending.contains(target)
    }

    /// Admits a target into the swarm.
    ///
    /// Does nothing if the target is already pending or has a live worker. Otherwise a
    /// worker is built under an admission permit, initialized under an init permit,
    /// registered and its step loop started.
    ///
    /// # Arguments
    /// * `target` - The identity of the worker to admit.
    ///
    /// # Returns
    /// The new worker, `None` if the target was already admitted, or the construction error.
    pub async fn admit(&self, target: &str) -> Result<Option<Arc<Worker>>> {
        {
            let mut registry = self.registry.lock();

            let alive = registry
                .workers
                .iter()
                .any(|w| w.target() == target && w.is_alive());

            if alive || registry.pending.contains(target) {
                debug!(device = target; "already admitted");
                return Ok(None);
            }

            registry.pending.insert(target.to_string());
        }

        let _pending = PendingGuard {
            registry: &self.registry,
            target,
        };

        let _permit = self.admission.acquire().await.map_err(|_| SwarmErr::Closed)?;
        let _starting = StartingGuard::new(&self.starting);

        let worker = self.builder.build(target).await?;

        {
            let _permit = self.init.acquire().await.map_err(|_| SwarmErr::Closed)?;
            worker.initialize().await?;
        }

        self.register(&worker);
        worker.spawn();

        info!(device = target; "admitted");
        Ok(Some(worker))
    }

    fn register(&self, worker: &Arc<Worker>) {
        let mut registry = self.registry.lock();

        registry.workers.retain(|w| {
            if w.target() == worker.target() {
                w.stop();
                return false;
            }

            w.is_alive()
        });

        if registry.workers.is_empty() {
            worker.clear_fresh();
        }

        registry.workers.push(Arc::clone(worker));
    }

    /// Admits every target concurrently and waits for all of them.
    ///
    /// # Returns
    /// The newly admitted workers. Failures are logged.
    pub async fn admit_all(&self, targets: &[String]) -> Vec<Arc<Worker>> {
        let results = future::join_all(targets.iter().map(|t| self.admit(t))).await;

        targets
            .iter()
            .zip(results)
            .filter_map(|(target, result)| match result {
                Ok(worker) => worker,
                Err(e) => {
                    error!(device = target.as_str(); "failed to admit: {e}");
                    None
                }
            })
            .collect()
    }

    /// Stops every worker's step loop.
    pub fn stop_all(&self) {
        for worker in self.registry.lock().workers.iter() {
            worker.stop();
        }
    }
}

/// Takes a target out of the pending set once its admission attempt ends.
struct PendingGuard<'a> {
    registry: &'a Mutex<Registry>,
    target: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().pending.remove(self.target);
    }
}

struct StartingGuard<'a> {
    starting: &'a AtomicUsize,
}

impl<'a> StartingGuard<'a> {
    fn new(starting: &'a AtomicUsize) -> Self {
        starting.fetch_add(1, Ordering::AcqRel);
        Self { starting }
    }
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.starting.fetch_sub(1, Ordering::AcqRel);
    }
}
