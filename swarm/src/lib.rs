pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod swarm;
pub mod sync;

pub use command::{Command, read_commands};
pub use config::SwarmConfig;
pub use control::{ControlLoop, Flow};
pub use error::{Result, SwarmErr};
pub use swarm::Swarm;
pub use sync::{ChunkReport, Synchronizer};
