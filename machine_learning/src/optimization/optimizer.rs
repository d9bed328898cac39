use super::{Adam, GradientDescent};

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer: Send + Sync {
    /// Updates the provided slice of parameters using the gradient.
    ///
    /// # Arguments
    /// * `grad` - The gradient corresponding to `params`.
    /// * `params` - A mutable slice of the current parameter values.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]);
}

/// Describes an optimizer so that a fresh one can be built for any parameter count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerSpec {
    GradientDescent { learning_rate: f32 },
    Adam { learning_rate: f32 },
}

impl OptimizerSpec {
    /// Builds the optimizer for a model of `len` parameters.
    pub fn build(self, len: usize) -> Box<dyn Optimizer> {
        match self {
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerSpec::Adam { learning_rate } => {
                Box::new(Adam::new(len, learning_rate, 0.9, 0.999, 1e-7))
            }
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match *self {
            OptimizerSpec::GradientDescent { learning_rate }
            | OptimizerSpec::Adam { learning_rate } => learning_rate,
        }
    }
}
