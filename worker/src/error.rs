use std::{error::Error, fmt, io};

use machine_learning::ComputeErr;

use crate::checkpoint::CheckpointErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Compute(ComputeErr),
    Checkpoint(CheckpointErr),
    Io(io::Error),
    NotInitialized,
    ChunkOutOfRange {
        chunk: usize,
        chunks: usize,
    },
    ChunkShapeMismatch {
        chunk: usize,
        got: usize,
        expected: usize,
    },
}

impl WorkerErr {
    /// Whether this failure means the worker's compute context is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Compute(e) if e.is_fatal())
    }
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Compute(e) => write!(f, "{e}"),
            WorkerErr::Checkpoint(e) => write!(f, "checkpoint error: {e}"),
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::NotInitialized => write!(f, "worker is not initialized"),
            WorkerErr::ChunkOutOfRange { chunk, chunks } => {
                write!(f, "chunk {chunk} out of range, worker has {chunks} chunks")
            }
            WorkerErr::ChunkShapeMismatch {
                chunk,
                got,
                expected,
            } => write!(
                f,
                "chunk {chunk} expects {expected} values, got {got}"
            ),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Compute(e) => Some(e),
            WorkerErr::Checkpoint(e) => Some(e),
            WorkerErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ComputeErr> for WorkerErr {
    fn from(value: ComputeErr) -> Self {
        Self::Compute(value)
    }
}

impl From<CheckpointErr> for WorkerErr {
    fn from(value: CheckpointErr) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
