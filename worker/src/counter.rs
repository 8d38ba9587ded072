use parking_lot::Mutex;

/// The process-wide step counter shared by every worker.
///
/// Only ever read or advanced under its lock, so concurrent increments
/// hand out unique, strictly increasing values.
#[derive(Debug)]
pub struct StepCounter {
    value: Mutex<u64>,
}

impl StepCounter {
    /// Creates a new `StepCounter`.
    ///
    /// # Arguments
    /// * `start` - The first step number to hand out.
    pub fn new(start: u64) -> Self {
        Self {
            value: Mutex::new(start),
        }
    }

    /// Creates a counter resuming after the last persisted step, or at `1`.
    pub fn resume(last_saved: Option<u64>) -> Self {
        Self::new(last_saved.map_or(1, |step| step + 1))
    }

    /// Advances the counter.
    ///
    /// # Returns
    /// The new value.
    pub fn incr(&self) -> u64 {
        let mut value = self.value.lock();
        *value += 1;
        *value
    }

    pub fn get(&self) -> u64 {
        *self.value.lock()
    }
}

impl Default for StepCounter {
    fn default() -> Self {
        Self::new(1)
    }
}
