pub mod builder;
pub mod checkpoint;
pub mod chunks;
pub mod config;
pub mod counter;
pub mod error;
pub mod state;
pub mod stats;
pub mod worker;

pub use builder::{SamplerFactory, WorkerBuilder};
pub use checkpoint::{CheckpointManager, CheckpointStore, JsonStore, SavePolicy};
pub use config::{RestoreFrom, WorkerConfig};
pub use counter::StepCounter;
pub use error::{Result, WorkerErr};
pub use state::WorkerState;
pub use worker::{Worker, WorkerStatus};
