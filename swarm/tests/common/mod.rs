#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    io,
    num::NonZeroUsize,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use machine_learning::{
    Batch, ComputeEngine, ComputeErr, EngineFactory, Hyperparams, Liveness, Sampler,
    VariableSpec,
};
use parking_lot::Mutex;
use swarm::{Swarm, SwarmConfig};
use worker::{
    CheckpointManager, JsonStore, SamplerFactory, StepCounter, Worker, WorkerBuilder,
    WorkerConfig,
};

/// An engine holding plain vectors; reads can be slowed down to fake stragglers.
pub struct MockEngine {
    vars: Vec<VariableSpec>,
    values: Mutex<HashMap<String, Vec<f32>>>,
    init_value: f32,
    read_delay: Mutex<Duration>,
    aborted: AtomicBool,
}

impl MockEngine {
    pub fn new(shapes: &[(String, Vec<usize>)], init_value: f32) -> Self {
        let vars: Vec<_> = shapes
            .iter()
            .map(|(name, shape)| VariableSpec::new(name.clone(), shape.clone()))
            .collect();
        let values = vars
            .iter()
            .map(|v| (v.name.clone(), vec![0.; v.len()]))
            .collect();

        Self {
            vars,
            values: Mutex::new(values),
            init_value,
            read_delay: Mutex::new(Duration::ZERO),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, name: &str) -> Vec<f32> {
        self.values.lock()[name].clone()
    }

    pub fn set(&self, name: &str, value: Vec<f32>) {
        self.values.lock().insert(name.to_string(), value);
    }

    fn check(&self) -> machine_learning::Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(ComputeErr::Aborted);
        }
        Ok(())
    }
}

impl ComputeEngine for MockEngine {
    fn variables(&self) -> &[VariableSpec] {
        &self.vars
    }

    fn initialize(&self, _deadline: Duration) -> machine_learning::Result<()> {
        self.check()?;
        let mut values = self.values.lock();
        for var in &self.vars {
            values.insert(var.name.clone(), vec![self.init_value; var.len()]);
        }
        Ok(())
    }

    fn run_step(
        &self,
        _batch: &Batch,
        _hyper: Hyperparams,
        _deadline: Duration,
    ) -> machine_learning::Result<f32> {
        self.check()?;
        Ok(1.)
    }

    fn read(&self, names: &[String], _deadline: Duration) -> machine_learning::Result<Vec<Vec<f32>>> {
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        self.check()?;
        let values = self.values.lock();
        names
            .iter()
            .map(|n| {
                values
                    .get(n)
                    .cloned()
                    .ok_or_else(|| ComputeErr::UnknownVariable(n.clone()))
            })
            .collect()
    }

    fn write(
        &self,
        names: &[String],
        new: &[Vec<f32>],
        _deadline: Duration,
    ) -> machine_learning::Result<()> {
        self.check()?;
        let mut values = self.values.lock();
        for (name, value) in names.iter().zip(new) {
            values.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn probe(&self) -> Liveness {
        if self.aborted.load(Ordering::SeqCst) {
            Liveness::Aborted
        } else {
            Liveness::Alive
        }
    }
}

/// Hands out `MockEngine`s, tracking how many are being built at once.
pub struct MockFactory {
    shapes: Vec<(String, Vec<usize>)>,
    init_value: f32,
    connect_delay: Duration,
    failing: HashSet<String>,
    engines: Mutex<HashMap<String, Arc<MockEngine>>>,
    pub connects: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockFactory {
    pub fn new(shapes: &[(&str, &[usize])], init_value: f32) -> Self {
        Self {
            shapes: shapes
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_vec()))
                .collect(),
            init_value,
            connect_delay: Duration::ZERO,
            failing: HashSet::new(),
            engines: Mutex::new(HashMap::new()),
            connects: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn failing(mut self, target: &str) -> Self {
        self.failing.insert(target.to_string());
        self
    }

    pub fn engine(&self, target: &str) -> Arc<MockEngine> {
        Arc::clone(&self.engines.lock()[target])
    }
}

impl EngineFactory for MockFactory {
    fn connect(&self, target: &str) -> machine_learning::Result<Arc<dyn ComputeEngine>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        thread::sleep(self.connect_delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(target) {
            return Err(ComputeErr::Other(format!("no device {target}")));
        }

        let engine = Arc::new(MockEngine::new(&self.shapes, self.init_value));
        self.engines
            .lock()
            .insert(target.to_string(), Arc::clone(&engine));
        Ok(engine)
    }
}

pub struct ZeroSampler;

impl Sampler for ZeroSampler {
    fn sample(&self, length: usize) -> Vec<u32> {
        vec![0; length]
    }
}

/// One chunk holding `p`, one holding `q`.
pub const SHAPES: &[(&str, &[usize])] = &[("p", &[2]), ("q", &[2])];

pub fn worker_config(root: &Path) -> WorkerConfig {
    WorkerConfig {
        checkpoint_dir: root.join("checkpoint"),
        models_dir: root.join("models"),
        batch_size: NonZeroUsize::new(1).unwrap(),
        sample_ctx: NonZeroUsize::new(2).unwrap(),
        chunk_size: NonZeroUsize::new(2).unwrap(),
        fresh_model: true,
        idle_yield_ms: 5,
        ..Default::default()
    }
}

pub fn swarm_config() -> SwarmConfig {
    SwarmConfig {
        targets: Vec::new(),
        seed: Some(0),
        averaging_yield_ms: 1,
        idle_ms: 10,
        round_timeout_ms: 300,
        round_timeout_per_worker_ms: 0,
        save_on_quit: false,
        ..Default::default()
    }
}

pub fn builder(config: WorkerConfig, factory: Arc<MockFactory>) -> WorkerBuilder {
    let checkpoints = Arc::new(CheckpointManager::new(
        Arc::new(JsonStore::new(config.max_to_keep)),
        &config,
    ));
    let samplers: SamplerFactory =
        Arc::new(|| -> io::Result<Arc<dyn Sampler>> { Ok(Arc::new(ZeroSampler)) });

    WorkerBuilder::new(
        Arc::new(config),
        factory,
        samplers,
        Arc::new(StepCounter::new(1)),
        checkpoints,
    )
    .unwrap()
}

pub fn new_swarm(root: &Path, factory: Arc<MockFactory>, config: &SwarmConfig) -> Arc<Swarm> {
    Swarm::new(builder(worker_config(root), factory), config)
}

/// Builds initialized, non-fresh workers outside of any swarm.
pub async fn workers(
    builder: &WorkerBuilder,
    targets: &[&str],
) -> Vec<Arc<Worker>> {
    let mut workers = Vec::new();
    for target in targets {
        let worker = builder.build(target).await.unwrap();
        worker.initialize().await.unwrap();
        worker.clear_fresh();
        workers.push(worker);
    }
    workers
}
