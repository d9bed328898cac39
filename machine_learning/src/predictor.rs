use std::path::Path;

use crate::error::Result;

/// A trainable scalar regressor over fixed-size feature vectors.
///
/// Batches are passed row-major: `xs` holds `ys.len()` rows of `input_dim()` features each.
pub trait Predictor: Send + Sync {
    /// The amount of features each input row must have.
    fn input_dim(&self) -> usize;

    /// Predicts the target for one feature vector.
    fn predict(&self, x: &[f32]) -> Result<f32>;

    /// Returns a copy of the flat parameter buffer.
    fn parameters(&self) -> Vec<f32>;

    /// Replaces the whole parameter buffer.
    fn set_parameters(&mut self, params: &[f32]) -> Result<()>;

    /// Runs one optimization step over a batch.
    ///
    /// # Returns
    /// The batch loss before the step.
    fn fit_batch(&mut self, xs: &[f32], ys: &[f32]) -> Result<f32>;

    /// Computes the loss of a batch without updating anything. An empty batch has zero loss.
    fn evaluate(&self, xs: &[f32], ys: &[f32]) -> Result<f32>;

    /// Writes the parameters to `path`.
    fn persist(&self, path: &Path) -> Result<()>;

    /// Loads the parameters from `path`.
    fn restore(&mut self, path: &Path) -> Result<()>;
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
    fn input_dim(&self) -> usize {
        (**self).input_dim()
    }

    fn predict(&self, x: &[f32]) -> Result<f32> {
        (**self).predict(x)
    }

    fn parameters(&self) -> Vec<f32> {
        (**self).parameters()
    }

    fn set_parameters(&mut self, params: &[f32]) -> Result<()> {
        (**self).set_parameters(params)
    }

    fn fit_batch(&mut self, xs: &[f32], ys: &[f32]) -> Result<f32> {
        (**self).fit_batch(xs, ys)
    }

    fn evaluate(&self, xs: &[f32], ys: &[f32]) -> Result<f32> {
        (**self).evaluate(xs, ys)
    }

    fn persist(&self, path: &Path) -> Result<()> {
        (**self).persist(path)
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        (**self).restore(path)
    }
}
