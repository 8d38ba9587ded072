mod accumulator;
mod synchronizer;

pub use accumulator::Accumulator;
pub use synchronizer::{ChunkReport, Synchronizer};
