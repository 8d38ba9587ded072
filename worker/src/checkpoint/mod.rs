mod error;
mod manager;
mod store;

pub use error::{CheckpointErr, Result};
pub use manager::{CheckpointManager, SavePolicy, read_counter};
pub use store::{Checkpoint, CheckpointHandle, CheckpointStore, JsonStore, Tensor};
