use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use parking_lot::{Mutex, RwLock};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::Deserialize;

use crate::{
    engine::{Batch, ComputeEngine, EngineFactory, Hyperparams, Liveness, VariableSpec},
    error::{ComputeErr, Result},
    initialization::{ParamGen, RandParamGen},
    optimization::{Optimizer, OptimizerKind},
};

const WTE: usize = 0;
const WOUT: usize = 1;
const BIAS: usize = 2;

/// Dimensions and training setup of a `BigramEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_vocab: usize,
    pub n_embd: usize,
    pub init_std: f32,
    pub optimizer: OptimizerKind,
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_vocab: 256,
            n_embd: 32,
            init_std: 0.02,
            optimizer: OptimizerKind::default(),
            seed: None,
        }
    }
}

/// Gradient buffers plus loss bookkeeping for a slice of the batch.
struct Grads {
    wte: Array2<f32>,
    wout: Array2<f32>,
    bias: Array1<f32>,
    loss: f32,
    count: usize,
}

impl Grads {
    fn zeros(vocab: usize, embd: usize) -> Self {
        Self {
            wte: Array2::zeros((vocab, embd)),
            wout: Array2::zeros((embd, vocab)),
            bias: Array1::zeros(vocab),
            loss: 0.,
            count: 0,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.wte += &other.wte;
        self.wout += &other.wout;
        self.bias += &other.bias;
        self.loss += other.loss;
        self.count += other.count;
        self
    }
}

/// A factorized next-token model: an embedding table followed by a linear readout.
///
/// Small enough to train on a CPU, it exists so a node can run end to end and so the
/// swarm can be exercised against a real optimizer.
pub struct BigramEngine {
    config: ModelConfig,
    specs: Vec<VariableSpec>,
    index: HashMap<String, usize>,
    vars: RwLock<Vec<Vec<f32>>>,
    optimizers: Mutex<Vec<Box<dyn Optimizer>>>,
    aborted: AtomicBool,
}

impl BigramEngine {
    /// Creates a new `BigramEngine` with zeroed variables.
    ///
    /// # Arguments
    /// * `scope` - Prefix of every variable name.
    /// * `config` - The model dimensions.
    pub fn new(scope: &str, config: ModelConfig) -> Self {
        let ModelConfig {
            n_vocab: vocab,
            n_embd: embd,
            ..
        } = config;

        let specs = vec![
            VariableSpec::new(format!("{scope}/wte"), vec![vocab, embd]),
            VariableSpec::new(format!("{scope}/wout"), vec![embd, vocab]),
            VariableSpec::new(format!("{scope}/bias"), vec![vocab]),
        ];

        let index = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), i))
            .collect();

        let vars = specs.iter().map(|spec| vec![0.; spec.len()]).collect();
        let optimizers = Self::build_optimizers(&config, &specs);

        Self {
            config,
            specs,
            index,
            vars: RwLock::new(vars),
            optimizers: Mutex::new(optimizers),
            aborted: AtomicBool::new(false),
        }
    }

    /// Tears down the context, every following call fails with `ComputeErr::Aborted`.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn build_optimizers(config: &ModelConfig, specs: &[VariableSpec]) -> Vec<Box<dyn Optimizer>> {
        specs
            .iter()
            .map(|spec| config.optimizer.build(spec.len()))
            .collect()
    }

    fn check_alive(&self) -> Result<()> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(ComputeErr::Aborted);
        }

        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ComputeErr::UnknownVariable(name.to_string()))
    }

    /// Accumulates the cross-entropy gradient of one token sequence into `grads`.
    fn accumulate_sequence(&self, vars: &[Vec<f32>], seq: &[u32], grads: &mut Grads) -> Result<()> {
        let ModelConfig {
            n_vocab: vocab,
            n_embd: embd,
            ..
        } = self.config;

        let shape_err = |e: ndarray::ShapeError| ComputeErr::Other(e.to_string());
        let wte = ArrayView2::from_shape((vocab, embd), &vars[WTE]).map_err(shape_err)?;
        let wout = ArrayView2::from_shape((embd, vocab), &vars[WOUT]).map_err(shape_err)?;
        let bias = ArrayView1::from(&vars[BIAS][..]);

        for pair in seq.windows(2) {
            let (cur, next) = (pair[0] as usize % vocab, pair[1] as usize % vocab);

            let h = wte.row(cur);
            let mut probs = h.dot(&wout) + &bias;
            let max = probs.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            probs.mapv_inplace(|x| (x - max).exp());
            let total = probs.sum();
            probs /= total;

            grads.loss -= probs[next].max(f32::MIN_POSITIVE).ln();
            grads.count += 1;

            // `probs` becomes dL/dlogits.
            probs[next] -= 1.;

            grads.bias += &probs;
            for (i, &hi) in h.iter().enumerate() {
                grads.wout.row_mut(i).scaled_add(hi, &probs);
            }

            let dh = wout.dot(&probs);
            let mut row = grads.wte.row_mut(cur);
            row += &dh;
        }

        Ok(())
    }
}

impl ComputeEngine for BigramEngine {
    fn variables(&self) -> &[VariableSpec] {
        &self.specs
    }

    fn initialize(&self, deadline: Duration) -> Result<()> {
        self.check_alive()?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let std_dev = self.config.init_std;
        let mut fresh = Vec::with_capacity(self.specs.len());
        for (i, spec) in self.specs.iter().enumerate() {
            let values = if i == BIAS {
                vec![0.; spec.len()]
            } else {
                RandParamGen::normal(&mut rng, spec.len(), 0., std_dev)
                    .map_err(|e| ComputeErr::Other(e.to_string()))?
                    .collect_all(spec.len().max(1))
            };
            fresh.push(values);
        }

        let mut vars = self
            .vars
            .try_write_for(deadline)
            .ok_or(ComputeErr::Timeout { op: "initialize" })?;
        *vars = fresh;
        *self.optimizers.lock() = Self::build_optimizers(&self.config, &self.specs);

        Ok(())
    }

    fn run_step(&self, batch: &Batch, hyper: Hyperparams, deadline: Duration) -> Result<f32> {
        self.check_alive()?;
        let start = Instant::now();

        let snapshot = self
            .vars
            .try_read_for(deadline)
            .ok_or(ComputeErr::Timeout { op: "run_step" })?
            .clone();

        let (vocab, embd) = (self.config.n_vocab, self.config.n_embd);
        let mut grads = batch
            .par_iter()
            .try_fold(
                || Grads::zeros(vocab, embd),
                |mut acc, seq| {
                    self.accumulate_sequence(&snapshot, seq, &mut acc)?;
                    Ok::<_, ComputeErr>(acc)
                },
            )
            .try_reduce(|| Grads::zeros(vocab, embd), |a, b| Ok(a.merge(b)))?;

        if grads.count == 0 {
            return Err(ComputeErr::Other(
                "batch holds no token pairs to train on".into(),
            ));
        }

        let remaining = deadline
            .checked_sub(start.elapsed())
            .ok_or(ComputeErr::DeadlineExceeded { op: "run_step" })?;

        let scale = 1. / grads.count as f32;
        grads.wte *= scale;
        grads.wout *= scale;
        grads.bias *= scale;
        let loss = grads.loss * scale;

        let flat = [
            grads.wte.into_raw_vec_and_offset().0,
            grads.wout.into_raw_vec_and_offset().0,
            grads.bias.into_raw_vec_and_offset().0,
        ];

        let mut vars = self
            .vars
            .try_write_for(remaining)
            .ok_or(ComputeErr::Timeout { op: "run_step" })?;
        let mut optimizers = self.optimizers.lock();

        for ((params, grad), optimizer) in vars.iter_mut().zip(&flat).zip(optimizers.iter_mut()) {
            optimizer.update_params(grad, params, hyper)?;
        }

        Ok(loss)
    }

    fn read(&self, names: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>> {
        self.check_alive()?;

        let vars = self
            .vars
            .try_read_for(deadline)
            .ok_or(ComputeErr::Timeout { op: "read" })?;

        names
            .iter()
            .map(|name| Ok(vars[self.resolve(name)?].clone()))
            .collect()
    }

    fn write(&self, names: &[String], values: &[Vec<f32>], deadline: Duration) -> Result<()> {
        self.check_alive()?;

        if names.len() != values.len() {
            return Err(ComputeErr::Other(format!(
                "got {} values for {} variables",
                values.len(),
                names.len()
            )));
        }

        let mut targets = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values) {
            let idx = self.resolve(name)?;
            let expected = self.specs[idx].len();

            if value.len() != expected {
                return Err(ComputeErr::ShapeMismatch {
                    name: name.clone(),
                    got: value.len(),
                    expected,
                });
            }

            targets.push(idx);
        }

        let mut vars = self
            .vars
            .try_write_for(deadline)
            .ok_or(ComputeErr::Timeout { op: "write" })?;

        for (idx, value) in targets.into_iter().zip(values) {
            vars[idx].copy_from_slice(value);
        }

        Ok(())
    }

    fn probe(&self) -> Liveness {
        match self.aborted.load(Ordering::Acquire) {
            true => Liveness::Aborted,
            false => Liveness::Alive,
        }
    }
}

/// Builds a `BigramEngine` per target, every target is served from the local CPU.
#[derive(Debug, Clone)]
pub struct BigramFactory {
    scope: String,
    config: ModelConfig,
}

impl BigramFactory {
    /// Creates a new `BigramFactory`.
    ///
    /// # Arguments
    /// * `scope` - Prefix of every variable name.
    /// * `config` - The model dimensions shared by every engine.
    pub fn new(scope: impl Into<String>, config: ModelConfig) -> Self {
        Self {
            scope: scope.into(),
            config,
        }
    }
}

impl EngineFactory for BigramFactory {
    fn connect(&self, target: &str) -> Result<Arc<dyn ComputeEngine>> {
        if self.config.n_vocab == 0 || self.config.n_embd == 0 {
            return Err(ComputeErr::Other(format!(
                "cannot build a model with n_vocab={} and n_embd={}",
                self.config.n_vocab, self.config.n_embd
            )));
        }

        debug!(device = target; "allocating bigram engine");
        Ok(Arc::new(BigramEngine::new(&self.scope, self.config)))
    }
}
