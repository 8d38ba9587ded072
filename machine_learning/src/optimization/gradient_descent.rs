use super::{Optimizer, optimizer::check_len};
use crate::{engine::Hyperparams, error::Result};

/// Plain stochastic gradient descent, ignores weight decay.
#[derive(Debug)]
pub struct GradientDescent;

impl Optimizer for GradientDescent {
    fn update_params(
        &mut self,
        grad: &[f32],
        params: &mut [f32],
        hyper: Hyperparams,
    ) -> Result<()> {
        check_len(grad, params)?;

        let lr = hyper.learning_rate;

        for (p, g) in params.iter_mut().zip(grad) {
            *p -= lr * g;
        }

        Ok(())
    }
}
