#![allow(dead_code)]

use std::{
    collections::HashMap,
    io,
    num::NonZeroUsize,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use machine_learning::{
    Batch, ComputeEngine, ComputeErr, EngineFactory, Hyperparams, Liveness, Sampler,
    VariableSpec,
};
use parking_lot::Mutex;
use worker::{
    CheckpointManager, JsonStore, SamplerFactory, StepCounter, WorkerBuilder, WorkerConfig,
};

/// An engine holding plain vectors, with a scripted loss.
pub struct MockEngine {
    vars: Vec<VariableSpec>,
    values: Mutex<HashMap<String, Vec<f32>>>,
    init_value: f32,
    loss: Mutex<f32>,
    aborted: AtomicBool,
    pub inits: AtomicUsize,
    pub steps: AtomicUsize,
}

impl MockEngine {
    pub fn new(shapes: &[(&str, &[usize])], init_value: f32) -> Self {
        let vars: Vec<_> = shapes
            .iter()
            .map(|(name, shape)| VariableSpec::new(*name, shape.to_vec()))
            .collect();
        let values = vars
            .iter()
            .map(|v| (v.name.clone(), vec![0.; v.len()]))
            .collect();

        Self {
            vars,
            values: Mutex::new(values),
            init_value,
            loss: Mutex::new(1.),
            aborted: AtomicBool::new(false),
            inits: AtomicUsize::new(0),
            steps: AtomicUsize::new(0),
        }
    }

    pub fn set_loss(&self, loss: f32) {
        *self.loss.lock() = loss;
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
        self.inits.fetch_add(1, Ordering::SeqCst);
        let mut values = self.values.lock();
        for var in &self.vars {
            values.insert(var.name.clone(), vec![self.init_value; var.len()]);
        }
        Ok(())
    }

    fn run_step(
        &self,
        batch: &Batch,
        _hyper: Hyperparams,
        _deadline: Duration,
    ) -> machine_learning::Result<f32> {
        self.check()?;
        assert!(!batch.is_empty());
        self.steps.fetch_add(1, Ordering::SeqCst);
        Ok(*self.loss.lock())
    }

    fn read(&self, names: &[String], _deadline: Duration) -> machine_learning::Result<Vec<Vec<f32>>> {
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

/// Hands out a `MockEngine` per target and keeps them around for inspection.
pub struct MockFactory {
    shapes: Vec<(String, Vec<usize>)>,
    init_value: f32,
    engines: Mutex<HashMap<String, Arc<MockEngine>>>,
}

impl MockFactory {
    pub fn new(shapes: &[(&str, &[usize])], init_value: f32) -> Self {
        Self {
            shapes: shapes
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_vec()))
                .collect(),
            init_value,
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self, target: &str) -> Arc<MockEngine> {
        Arc::clone(&self.engines.lock()[target])
    }
}

impl EngineFactory for MockFactory {
    fn connect(&self, target: &str) -> machine_learning::Result<Arc<dyn ComputeEngine>> {
        let shapes: Vec<(&str, &[usize])> = self
            .shapes
            .iter()
            .map(|(n, s)| (n.as_str(), s.as_slice()))
            .collect();
        let engine = Arc::new(MockEngine::new(&shapes, self.init_value));
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

pub fn samplers() -> SamplerFactory {
    Arc::new(|| -> io::Result<Arc<dyn Sampler>> { Ok(Arc::new(ZeroSampler)) })
}

pub const SHAPES: &[(&str, &[usize])] = &[("w", &[2, 2]), ("b", &[2])];

pub fn config(root: &Path) -> WorkerConfig {
    WorkerConfig {
        checkpoint_dir: root.join("checkpoint"),
        models_dir: root.join("models"),
        batch_size: NonZeroUsize::new(2).unwrap(),
        sample_ctx: NonZeroUsize::new(4).unwrap(),
        chunk_size: NonZeroUsize::new(4).unwrap(),
        idle_yield_ms: 1,
        ..Default::default()
    }
}

pub fn builder(config: WorkerConfig, factory: Arc<MockFactory>) -> WorkerBuilder {
    let checkpoints = Arc::new(CheckpointManager::new(
        Arc::new(JsonStore::new(config.max_to_keep)),
        &config,
    ));

    WorkerBuilder::new(
        Arc::new(config),
        factory,
        samplers(),
        Arc::new(StepCounter::new(1)),
        checkpoints,
    )
    .unwrap()
}
