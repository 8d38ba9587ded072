use std::{sync::Arc, time::Duration};

use crate::error::Result;

/// The name and shape of a variable held by a compute engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// Returns the amount of scalar values in this variable.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A batch of token sequences, all of the same length.
pub type Batch = Vec<Vec<u32>>;

/// The per-step values fed into the optimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparams {
    pub learning_rate: f32,
    pub weight_decay: f32,
}

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Aborted,
}

/// The opaque numeric backend of a single worker.
///
/// Every call is blocking and must honor the deadline it's given, either by finishing
/// in time or by failing with a fatal `ComputeErr`. The engine holds the variables;
/// callers only ever see copies of their values.
pub trait ComputeEngine: Send + Sync {
    /// The variables held by this engine, in a stable order.
    fn variables(&self) -> &[VariableSpec];

    /// Sets every variable to its initial value.
    ///
    /// # Arguments
    /// * `deadline` - The maximum duration of the operation.
    fn initialize(&self, deadline: Duration) -> Result<()>;

    /// Runs one forward/backward pass over `batch` and applies the optimizer.
    ///
    /// # Arguments
    /// * `batch` - The token sequences to train on.
    /// * `hyper` - The learning rate and weight decay for this step.
    /// * `deadline` - The maximum duration of the operation.
    ///
    /// # Returns
    /// The loss observed before the update.
    fn run_step(&self, batch: &Batch, hyper: Hyperparams, deadline: Duration) -> Result<f32>;

    /// Copies the current values of `names`, in the same order.
    fn read(&self, names: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>>;

    /// Overwrites the values of `names` with `values`, matched by position.
    fn write(&self, names: &[String], values: &[Vec<f32>], deadline: Duration) -> Result<()>;

    /// Cheap check of whether the context is still usable.
    fn probe(&self) -> Liveness;
}

/// Allocates a compute context for a target.
pub trait EngineFactory: Send + Sync {
    /// Connects to `target` and builds a fresh, uninitialized engine on it.
    ///
    /// # Arguments
    /// * `target` - A device or host identifier, e.g. `"auto"`.
    ///
    /// # Returns
    /// The engine, or a `ComputeErr` if the context could not be allocated.
    fn connect(&self, target: &str) -> Result<Arc<dyn ComputeEngine>>;
}
