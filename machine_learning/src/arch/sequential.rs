use ndarray::{Array2, ArrayView2};

use super::{
    layers::Dense,
    loss::{LossFn, Mse},
};
use crate::error::{MlErr, Result};

/// A stack of dense layers sharing one flat parameter buffer.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Dense>,
    size: usize,
}

impl Sequential {
    /// Creates a new `Sequential` model.
    ///
    /// # Arguments
    /// * `layers` - The layers in evaluation order, each one's input matching the previous output.
    ///
    /// # Returns
    /// An error if the layers don't chain.
    pub fn new(layers: Vec<Dense>) -> Result<Self> {
        if layers.is_empty() {
            return Err(MlErr::InvalidSpec("a model needs at least one layer".into()));
        }

        for pair in layers.windows(2) {
            let (_, out) = pair[0].dim();
            let (inp, _) = pair[1].dim();
            if out != inp {
                return Err(MlErr::InvalidSpec(format!(
                    "layer output of size {out} feeds a layer expecting {inp}"
                )));
            }
        }

        let size = layers.iter().map(Dense::size).sum();
        Ok(Self { layers, size })
    }

    /// Returns the total amount of parameters of the model.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the input size of the model.
    pub fn input_dim(&self) -> usize {
        self.layers[0].dim().0
    }

    /// Returns the output size of the model.
    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].dim().1
    }

    /// Returns the (fan in, fan out, size) of each layer.
    pub fn layer_shapes(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.layers.iter().map(|l| {
            let (fan_in, fan_out) = l.dim();
            (fan_in, fan_out, l.size())
        })
    }

    /// Runs the model over a batch.
    ///
    /// # Arguments
    /// * `params` - The whole parameter buffer.
    /// * `x` - The input batch.
    ///
    /// # Returns
    /// The model's output batch.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_params(params)?;

        let mut rest = params;
        let mut out = x.to_owned();
        for layer in &self.layers {
            let (layer_params, tail) = rest.split_at(layer.size());
            rest = tail;
            out = layer.forward(layer_params, out.view())?.a;
        }

        Ok(out)
    }

    /// Computes the mean squared error of a batch and its gradient.
    ///
    /// # Arguments
    /// * `params` - The whole parameter buffer.
    /// * `grad` - A buffer of the same size as `params`, overwritten with the gradient.
    /// * `x` - The input batch.
    /// * `y` - The expected output batch.
    ///
    /// # Returns
    /// The loss of the batch before any update.
    pub fn backprop(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<f32> {
        self.check_params(params)?;
        if grad.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: self.size,
            });
        }

        let mut inputs = Vec::with_capacity(self.layers.len() + 1);
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        inputs.push(x.to_owned());

        let mut offset = 0;
        for layer in &self.layers {
            let layer_params = &params[offset..offset + layer.size()];
            offset += layer.size();

            let out = layer.forward(layer_params, inputs[inputs.len() - 1].view())?;
            pre_activations.push(out.z);
            inputs.push(out.a);
        }

        let y_pred = inputs.pop().unwrap_or_default();
        let loss = Mse.loss(y_pred.view(), y);
        let mut d = Mse.loss_prime(y_pred.view(), y);

        let mut end = self.size;
        for (i, layer) in self.layers.iter().enumerate().rev() {
            let start = end - layer.size();
            d = layer.backward(
                &params[start..end],
                &mut grad[start..end],
                inputs[i].view(),
                pre_activations[i].view(),
                d,
            )?;
            end = start;
        }

        Ok(loss)
    }

    fn check_params(&self, params: &[f32]) -> Result<()> {
        if params.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got: params.len(),
                expected: self.size,
            });
        }

        Ok(())
    }
}
