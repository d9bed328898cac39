use std::{fmt, path::Path};

use ndarray::ArrayView2;
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Predictor,
    arch::{Sequential, activations::ActFn, layers::Dense},
    error::{MlErr, Result},
    initialization,
    optimization::{Optimizer, OptimizerSpec},
    persistence,
};

/// Describes the shape and training setup of a `Regressor`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressorSpec {
    pub input_dim: usize,
    pub hidden: Vec<usize>,
    pub optimizer: OptimizerSpec,
    pub seed: u64,
}

impl RegressorSpec {
    /// Creates a spec for a ReLU network trained with Adam.
    pub fn new(input_dim: usize, hidden: Vec<usize>, learning_rate: f32) -> Self {
        Self {
            input_dim,
            hidden,
            optimizer: OptimizerSpec::Adam { learning_rate },
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerSpec) -> Self {
        self.optimizer = optimizer;
        self
    }
}

/// A dense ReLU network with a single linear output, trained on mean squared error.
pub struct Regressor {
    model: Sequential,
    params: Vec<f32>,
    grad: Vec<f32>,
    optimizer: Box<dyn Optimizer>,
    optimizer_spec: OptimizerSpec,
}

impl fmt::Debug for Regressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Regressor")
            .field("model", &self.model)
            .field("optimizer", &self.optimizer_spec)
            .finish()
    }
}

impl Regressor {
    /// Builds a freshly initialized regressor.
    ///
    /// # Arguments
    /// * `spec` - The shape and training setup.
    ///
    /// # Returns
    /// An error if the shape is degenerate.
    pub fn new(spec: &RegressorSpec) -> Result<Self> {
        if spec.input_dim == 0 {
            return Err(MlErr::InvalidSpec("input dimension must be positive".into()));
        }
        if spec.hidden.contains(&0) {
            return Err(MlErr::InvalidSpec("hidden layers must be non-empty".into()));
        }

        let mut layers = Vec::with_capacity(spec.hidden.len() + 1);
        let mut fan_in = spec.input_dim;
        for &units in &spec.hidden {
            layers.push(Dense::new((fan_in, units), Some(ActFn::relu())));
            fan_in = units;
        }
        layers.push(Dense::new((fan_in, 1), None));

        let model = Sequential::new(layers)?;
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let params = initialization::xavier_uniform(model.layer_shapes(), &mut rng)?;
        let size = model.size();

        Ok(Self {
            model,
            params,
            grad: vec![0.0; size],
            optimizer: spec.optimizer.build(size),
            optimizer_spec: spec.optimizer,
        })
    }

    /// Views a row-major batch as matrices, checking that every row has `input_dim` features.
    fn view_batch<'a>(
        &self,
        xs: &'a [f32],
        ys: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView2<'a, f32>)> {
        let dim = self.input_dim();
        if xs.len() != ys.len() * dim {
            return Err(MlErr::SizeMismatch {
                what: "feature batch",
                got: xs.len(),
                expected: ys.len() * dim,
            });
        }

        let x = ArrayView2::from_shape((ys.len(), dim), xs)
            .map_err(|e| MlErr::InvalidSpec(e.to_string()))?;
        let y = ArrayView2::from_shape((ys.len(), 1), ys)
            .map_err(|e| MlErr::InvalidSpec(e.to_string()))?;
        Ok((x, y))
    }
}

impl Predictor for Regressor {
    fn input_dim(&self) -> usize {
        self.model.input_dim()
    }

    fn predict(&self, x: &[f32]) -> Result<f32> {
        let dim = self.input_dim();
        if x.len() != dim {
            return Err(MlErr::SizeMismatch {
                what: "feature vector",
                got: x.len(),
                expected: dim,
            });
        }

        let x =
            ArrayView2::from_shape((1, dim), x).map_err(|e| MlErr::InvalidSpec(e.to_string()))?;
        let out = self.model.forward(&self.params, x)?;
        Ok(out[[0, 0]])
    }

    fn parameters(&self) -> Vec<f32> {
        self.params.clone()
    }

    fn set_parameters(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(params);
        Ok(())
    }

    fn fit_batch(&mut self, xs: &[f32], ys: &[f32]) -> Result<f32> {
        if ys.is_empty() {
            return Ok(0.0);
        }

        let (x, y) = self.view_batch(xs, ys)?;
        let loss = self.model.backprop(&self.params, &mut self.grad, x, y)?;
        self.optimizer.update_params(&self.grad, &mut self.params);
        Ok(loss)
    }

    fn evaluate(&self, xs: &[f32], ys: &[f32]) -> Result<f32> {
        if ys.is_empty() {
            return Ok(0.0);
        }

        let (x, y) = self.view_batch(xs, ys)?;
        let y_pred = self.model.forward(&self.params, x)?;
        let n = ys.len() as f32;
        Ok((&y_pred - &y).mapv(|e| e.powi(2)).sum() / n)
    }

    fn persist(&self, path: &Path) -> Result<()> {
        persistence::save(path, &self.params)
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        let params = persistence::load(path, self.params.len())?;
        self.params = params;
        self.optimizer = self.optimizer_spec.build(self.params.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RegressorSpec {
        RegressorSpec::new(2, vec![8, 4], 0.01).with_seed(42)
    }

    #[test]
    fn same_seed_gives_same_parameters() {
        let a = Regressor::new(&spec()).unwrap();
        let b = Regressor::new(&spec()).unwrap();
        assert_eq!(a.parameters(), b.parameters());
        assert_eq!(a.parameters().len(), (2 + 1) * 8 + (8 + 1) * 4 + (4 + 1));
    }

    #[test]
    fn learns_a_linear_function() {
        let mut model = Regressor::new(&spec()).unwrap();

        let xs: Vec<f32> = (0..32)
            .flat_map(|i| {
                let a = (i % 8) as f32 / 8.0;
                let b = (i / 8) as f32 / 4.0;
                [a, b]
            })
            .collect();
        let ys: Vec<f32> = xs.chunks(2).map(|r| 2.0 * r[0] + r[1] + 0.5).collect();

        let before = model.evaluate(&xs, &ys).unwrap();
        for _ in 0..500 {
            model.fit_batch(&xs, &ys).unwrap();
        }
        let after = model.evaluate(&xs, &ys).unwrap();

        assert!(after < before / 4.0, "loss went from {before} to {after}");
    }

    #[test]
    fn evaluate_of_nothing_is_zero() {
        let model = Regressor::new(&spec()).unwrap();
        assert_eq!(model.evaluate(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn wrong_feature_count_is_rejected() {
        let model = Regressor::new(&spec()).unwrap();
        assert!(matches!(
            model.predict(&[1.0, 2.0, 3.0]),
            Err(MlErr::SizeMismatch { got: 3, expected: 2, .. })
        ));
    }

    #[test]
    fn set_parameters_must_match_size() {
        let mut model = Regressor::new(&spec()).unwrap();
        assert!(model.set_parameters(&[0.0; 3]).is_err());
    }

    #[test]
    fn restore_reproduces_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");

        let mut trained = Regressor::new(&spec()).unwrap();
        trained.fit_batch(&[0.5, 0.5], &[3.0]).unwrap();
        trained.persist(&path).unwrap();

        let mut fresh = Regressor::new(&spec().with_seed(1)).unwrap();
        fresh.restore(&path).unwrap();

        assert_eq!(
            fresh.predict(&[0.2, 0.9]).unwrap(),
            trained.predict(&[0.2, 0.9]).unwrap()
        );
    }
}
