use ndarray::{linalg, prelude::*};

use crate::{
    arch::activations::ActFn,
    error::{MlErr, Result},
};

/// A fully connected layer laid out over a flat parameter slice as `[weights | biases]`.
///
/// The layer holds no parameters of its own, only the shape and the activation, so the same
/// layer can be run against any slice of the right size.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,
}

/// The intermediate values of a forward pass needed to backpropagate through the layer.
pub struct Activation {
    pub z: Array2<f32>,
    pub a: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output sizes of the layer.
    /// * `act_fn` - The activation applied to the output, `None` for a linear layer.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the input and output sizes of this layer.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Runs the layer over a batch of rows.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of parameters.
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The pre-activation and post-activation outputs.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Activation> {
        let (w, b) = self.view_params(params)?;

        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        Ok(Activation { z, a })
    }

    /// Backpropagates the loss derivative through the layer, writing this layer's gradient.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of parameters.
    /// * `grad` - This layer's slice of the gradient, overwritten.
    /// * `x` - The input the forward pass was run with.
    /// * `z` - The pre-activation output of the forward pass.
    /// * `d` - The derivative of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The derivative of the loss with respect to this layer's input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        z: ArrayView2<f32>,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("gradient", grad.len())?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).map_err(shape_err)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).map_err(shape_err)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("layer parameters", params.len())?;

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size]).map_err(shape_err)?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..]).map_err(shape_err)?;
        Ok((weights, biases))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }
}

fn shape_err(e: ndarray::ShapeError) -> MlErr {
    MlErr::InvalidSpec(e.to_string())
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn forward_applies_weights_bias_and_activation() {
        let layer = Dense::new((2, 1), Some(ActFn::relu()));
        // w = [[1], [-1]], b = [0.5]
        let params = [1.0, -1.0, 0.5];

        let out = layer.forward(&params, array![[3.0, 1.0], [0.0, 2.0]].view()).unwrap();

        assert_eq!(out.z, array![[2.5], [-1.5]]);
        assert_eq!(out.a, array![[2.5], [0.0]]);
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let layer = Dense::new((2, 3), None);
        let err = layer.forward(&[0.0; 4], array![[1.0, 1.0]].view());
        assert!(matches!(
            err,
            Err(MlErr::SizeMismatch { expected: 9, got: 4, .. })
        ));
    }
}
