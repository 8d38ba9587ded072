use super::{Optimizer, optimizer::check_len};
use crate::{engine::Hyperparams, error::Result};

/// Adam, optionally with decoupled weight decay (AdamW).
#[derive(Debug)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
    decoupled_decay: bool,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    /// * `decoupled_decay` - Whether to apply the step's weight decay directly to the parameters.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, beta1: f32, beta2: f32, epsilon: f32, decoupled_decay: bool) -> Self {
        Self {
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
            decoupled_decay,
        }
    }
}

impl Optimizer for Adam {
    fn update_params(
        &mut self,
        grad: &[f32],
        params: &mut [f32],
        hyper: Hyperparams,
    ) -> Result<()> {
        check_len(grad, params)?;

        let Self {
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let lr = hyper.learning_rate;
        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);
        let decay = if self.decoupled_decay {
            lr * hyper.weight_decay
        } else {
            0.
        };

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps) + decay * *p;
            });

        Ok(())
    }
}
