use std::{error::Error, fmt, io, path::PathBuf};

pub type Result<T> = std::result::Result<T, CheckpointErr>;

/// Failures while persisting or restoring a parameter set.
#[derive(Debug)]
pub enum CheckpointErr {
    Io(io::Error),
    Format(serde_json::Error),
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    NotFound(PathBuf),
}

impl fmt::Display for CheckpointErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointErr::Io(e) => write!(f, "io error: {e}"),
            CheckpointErr::Format(e) => write!(f, "malformed checkpoint: {e}"),
            CheckpointErr::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "checkpoint variable {name} has shape {got:?}, model expects {expected:?}"
            ),
            CheckpointErr::NotFound(path) => {
                write!(f, "no checkpoint found at {}", path.display())
            }
        }
    }
}

impl Error for CheckpointErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointErr::Io(e) => Some(e),
            CheckpointErr::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckpointErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for CheckpointErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Format(value)
    }
}
