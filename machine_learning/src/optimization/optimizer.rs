use serde::Deserialize;

use super::{Adam, GradientDescent};
use crate::{
    engine::Hyperparams,
    error::{ComputeErr, Result},
};

/// Defines the strategy for updating a variable based on its gradient.
pub trait Optimizer: Send {
    /// Updates `params` in place using `grad`.
    ///
    /// # Arguments
    /// * `grad` - The gradient of the loss with respect to `params`.
    /// * `params` - The values to update.
    /// * `hyper` - The learning rate and weight decay of the current step.
    ///
    /// # Returns
    /// A `ShapeMismatch` error if `grad` and `params` have different lengths.
    fn update_params(
        &mut self,
        grad: &[f32],
        params: &mut [f32],
        hyper: Hyperparams,
    ) -> Result<()>;
}

/// Checks that a gradient lines up with the values it updates.
pub(super) fn check_len(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(ComputeErr::ShapeMismatch {
            name: "gradient".into(),
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}

/// Which optimizer a compute engine should build for each variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adam,
    #[default]
    AdamW,
}

impl OptimizerKind {
    /// Builds a boxed optimizer for a variable of `len` values.
    pub fn build(self, len: usize) -> Box<dyn Optimizer> {
        match self {
            Self::Sgd => Box::new(GradientDescent),
            Self::Adam => Box::new(Adam::new(len, 0.9, 0.999, 1e-8, false)),
            Self::AdamW => Box::new(Adam::new(len, 0.9, 0.999, 1e-8, true)),
        }
    }
}
