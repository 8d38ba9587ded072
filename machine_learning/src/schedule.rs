use std::f32::consts::PI;

use serde::Deserialize;

/// How the learning rate evolves with the global step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrSchedule {
    #[default]
    Constant,
    /// Linear warmup followed by cosine annealing with warm restarts.
    Cosine {
        warmup: u64,
        period: u64,
        min_rate: f32,
        #[serde(default)]
        initial_step: u64,
    },
}

impl LrSchedule {
    /// Computes the learning rate for a step.
    ///
    /// # Arguments
    /// * `base` - The peak learning rate.
    /// * `step` - The global step.
    ///
    /// # Returns
    /// The learning rate to use on `step`.
    pub fn rate(&self, base: f32, step: u64) -> f32 {
        match *self {
            Self::Constant => base,
            Self::Cosine {
                warmup,
                period,
                min_rate,
                initial_step,
            } => {
                let step = step.saturating_sub(initial_step);

                if step < warmup {
                    return base * (step + 1) as f32 / warmup as f32;
                }

                let period = period.max(1);
                let t = ((step - warmup) % period) as f32 / period as f32;
                min_rate + 0.5 * (base - min_rate) * (1. + (PI * t).cos())
            }
        }
    }
}
