use std::fmt;

/// Lifecycle of a worker.
///
/// `Starting → Fresh → Active ⇄ Paused`, and any state may fall into the terminal `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Under construction, parameters not initialized yet.
    Starting,
    /// Initialized, hasn't completed an averaging cycle.
    Fresh,
    /// Training and fully participating in averaging.
    Active,
    /// Step loop suspended, still averaged.
    Paused,
    /// The compute context failed or the worker was stopped.
    Dead,
}

impl WorkerState {
    /// Checks whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, next),
            (Starting, Fresh)
                | (Fresh, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Starting | Fresh | Active | Paused, Dead)
        )
    }

    #[inline]
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Fresh | Self::Active | Self::Paused)
    }

    #[inline]
    pub fn is_fresh(self) -> bool {
        matches!(self, Self::Starting | Self::Fresh)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Fresh => "fresh",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Dead => "dead",
        };

        f.write_str(s)
    }
}
