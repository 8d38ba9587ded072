pub mod bigram;
pub mod engine;
pub mod error;
pub mod initialization;
pub mod optimization;
pub mod sampler;
pub mod schedule;

pub use bigram::{BigramEngine, BigramFactory, ModelConfig};
pub use engine::{Batch, ComputeEngine, EngineFactory, Hyperparams, Liveness, VariableSpec};
pub use error::{ComputeErr, Result};
pub use sampler::{Sampler, TextSampler};
pub use schedule::LrSchedule;
