use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used by every compute engine call.
pub type Result<T> = std::result::Result<T, ComputeErr>;

/// Failures reported by a `ComputeEngine`.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeErr {
    /// The operation did not complete within its deadline and the context can't be trusted anymore.
    Timeout { op: &'static str },
    /// The compute context was torn down underneath the caller.
    Aborted,
    /// The engine noticed mid-operation that the caller's deadline elapsed.
    DeadlineExceeded { op: &'static str },
    /// A variable name that the engine doesn't hold.
    UnknownVariable(String),
    /// A value didn't match the registered shape of its variable.
    ShapeMismatch {
        name: String,
        got: usize,
        expected: usize,
    },
    /// The context could not be allocated or used for any other reason.
    Other(String),
}

impl ComputeErr {
    /// Whether this failure leaves the compute context unusable.
    ///
    /// # Returns
    /// `true` for timeouts, aborts and exceeded deadlines.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Aborted | Self::DeadlineExceeded { .. }
        )
    }
}

impl Display for ComputeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { op } => write!(f, "compute timeout during {op}"),
            Self::Aborted => f.write_str("compute context aborted"),
            Self::DeadlineExceeded { op } => write!(f, "deadline exceeded during {op}"),
            Self::UnknownVariable(name) => write!(f, "unknown variable {name}"),
            Self::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {name}: got {got} values, expected {expected}"
            ),
            Self::Other(msg) => write!(f, "compute error: {msg}"),
        }
    }
}

impl Error for ComputeErr {}
