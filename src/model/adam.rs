use crate::error::{LaneError, LaneResult};

/// Moment decay rates and the denominator guard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamHyperparameters {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for AdamHyperparameters {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Adam over the network's flat parameter vector.
///
/// Bias correction is folded into the step size,
/// `lr * sqrt(1 - beta2^t) / (1 - beta1^t)`, so epsilon is added to the
/// uncorrected second moment.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    hyper: AdamHyperparameters,
    /// Number of updates applied since creation or the last reset.
    step: i32,
    first_moment: Vec<f32>,
    second_moment: Vec<f32>,
}

impl Adam {
    pub fn new(len: usize, learning_rate: f32) -> Self {
        Self::with_hyperparameters(len, learning_rate, AdamHyperparameters::default())
    }

    pub fn with_hyperparameters(len: usize, learning_rate: f32, hyper: AdamHyperparameters) -> Self {
        Self {
            learning_rate,
            hyper,
            step: 0,
            first_moment: vec![0.0; len],
            second_moment: vec![0.0; len],
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Drops the moment estimates, e.g. after the parameters were replaced
    /// by a checkpoint.
    pub fn reset(&mut self) {
        self.step = 0;
        self.first_moment.iter_mut().for_each(|m| *m = 0.0);
        self.second_moment.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Applies one update of `params` against `grad`.
    pub fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> LaneResult<()> {
        let len = self.first_moment.len();
        if grad.len() != len || params.len() != len {
            return Err(LaneError::Model(format!(
                "optimizer tracks {len} parameters, got {} gradients for {} parameters",
                grad.len(),
                params.len()
            )));
        }

        let AdamHyperparameters {
            beta1,
            beta2,
            epsilon,
        } = self.hyper;
        self.step += 1;
        let step_size =
            self.learning_rate * (1.0 - beta2.powi(self.step)).sqrt() / (1.0 - beta1.powi(self.step));

        for (i, (param, &g)) in params.iter_mut().zip(grad).enumerate() {
            let m = &mut self.first_moment[i];
            let v = &mut self.second_moment[i];
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *param -= step_size * *m / (v.sqrt() + epsilon);
        }

        Ok(())
    }
}
