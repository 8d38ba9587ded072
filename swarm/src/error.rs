use std::{error::Error, fmt};

use worker::WorkerErr;

pub type Result<T> = std::result::Result<T, SwarmErr>;

/// Failures of the swarm coordination layer.
#[derive(Debug)]
pub enum SwarmErr {
    Worker(WorkerErr),
    /// Not a single worker reported a variable during a chunk's gather phase.
    ZeroReporters {
        chunk: usize,
        name: String,
    },
    /// The admission semaphores were closed.
    Closed,
}

impl fmt::Display for SwarmErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmErr::Worker(e) => write!(f, "worker error: {e}"),
            SwarmErr::ZeroReporters { chunk, name } => {
                write!(f, "no worker reported {name} for chunk {chunk}")
            }
            SwarmErr::Closed => write!(f, "swarm admission is closed"),
        }
    }
}

impl Error for SwarmErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SwarmErr::Worker(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WorkerErr> for SwarmErr {
    fn from(value: WorkerErr) -> Self {
        Self::Worker(value)
    }
}
