#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use machine_learning::{MlErr, Predictor};
use offloader::{
    CostModel, SampleStore,
    config::{OffloadConfig, Placement},
    error::ExecutionErr,
    executor::{ExecResult, LocalExecutor, RemoteExecutor, RemoteOutput},
    features::{FeatureLayout, TaskFeatures},
    models,
    store::BenchmarkInfo,
    training::{Trainer, TrainerOptions},
    variant::ModelVariant,
};

pub fn layout() -> FeatureLayout {
    FeatureLayout::new(1, vec![])
}

pub fn config() -> OffloadConfig {
    let mut config = OffloadConfig {
        features: layout(),
        ..Default::default()
    };
    config.models.local_time_hidden = vec![4];
    config.models.cloud_computation_time_hidden = vec![4];
    config.models.cloud_transmission_time_hidden = vec![4];
    config.models.learning_rate = 0.01;
    config
}

pub fn calibrated_store() -> Arc<SampleStore> {
    let store = SampleStore::in_memory(layout());
    store
        .put_benchmark_info(&BenchmarkInfo {
            repeats: 3,
            mean_local_time_ms: 20.,
        })
        .unwrap();
    Arc::new(store)
}

pub fn cost_model(store: &Arc<SampleStore>, placement: Placement) -> Arc<CostModel> {
    let config = config();
    let mut decision = config.decision.clone();
    decision.placement = placement;
    decision.seed = Some(7);

    let predictors = models::build_all(&models::regressor_factory(&config)).unwrap();
    Arc::new(CostModel::new(store.clone(), decision, predictors))
}

pub fn extract(task: &u32) -> TaskFeatures {
    TaskFeatures(vec![*task as f32])
}

/// Doubles the task.
#[derive(Default)]
pub struct Doubler {
    pub calls: AtomicUsize,
}

#[async_trait]
impl LocalExecutor<u32, u32> for Doubler {
    async fn execute(&self, task: &u32) -> ExecResult<u32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(task * 2)
    }
}

pub struct BrokenLocal;

#[async_trait]
impl LocalExecutor<u32, u32> for BrokenLocal {
    async fn execute(&self, _: &u32) -> ExecResult<u32> {
        Err(ExecutionErr::fatal("out of memory"))
    }
}

/// A remote that doubles the task, reporting a fixed compute time.
pub struct Remote {
    pub node_count: Option<u32>,
    pub calls: AtomicUsize,
}

impl Remote {
    pub fn new(node_count: Option<u32>) -> Self {
        Self {
            node_count,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteExecutor<u32, u32> for Remote {
    async fn execute(&self, task: &u32) -> ExecResult<RemoteOutput<u32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(RemoteOutput {
            output: task * 2,
            compute_time: Duration::from_millis(1),
            node_count: self.node_count,
        })
    }
}

/// A remote that always fails.
pub struct Unreachable {
    pub transient: bool,
    pub calls: AtomicUsize,
}

impl Unreachable {
    pub fn new(transient: bool) -> Self {
        Self {
            transient,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteExecutor<u32, u32> for Unreachable {
    async fn execute(&self, _: &u32) -> ExecResult<RemoteOutput<u32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(ExecutionErr::transient("connection reset"))
        } else {
            Err(ExecutionErr::fatal("bad request"))
        }
    }
}

/// Fills the store with `n` local samples following `time = 10 + 2 * x` milliseconds.
pub fn add_local_samples(store: &SampleStore, n: usize) {
    for i in 0..n {
        let x = i as u32;
        store
            .add_local_sample(&extract(&x), Duration::from_millis(10 + 2 * x as u64))
            .unwrap();
    }
}

/// A local time trainer over whatever the store holds.
pub fn local_trainer(store: &SampleStore, model_path: Option<PathBuf>) -> Arc<Trainer> {
    let variant = ModelVariant::LocalTime;
    let dataset = store.get_samples(variant).unwrap();
    let stats = store.get_stats(variant).unwrap();
    let predictor = models::build_regressor(variant, &config()).unwrap();

    let options = TrainerOptions {
        model_path,
        seed: 3,
        ..Default::default()
    };
    Arc::new(Trainer::new(variant, predictor, &dataset, stats, options))
}

/// `w·x + b`, trained with plain gradient steps on the mean squared error.
pub struct Linear {
    pub weights: Vec<f32>,
    pub bias: f32,
    pub learning_rate: f32,
}

impl Linear {
    pub fn new(weights: Vec<f32>, bias: f32) -> Self {
        Self {
            weights,
            bias,
            learning_rate: 0.01,
        }
    }

    fn check(
        &self,
        what: &'static str,
        got: usize,
        expected: usize,
    ) -> machine_learning::Result<()> {
        if got != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected,
            });
        }
        Ok(())
    }

    fn rows<'a>(&self, xs: &'a [f32]) -> std::slice::ChunksExact<'a, f32> {
        xs.chunks_exact(self.weights.len())
    }

    fn eval(&self, x: &[f32]) -> f32 {
        self.weights.iter().zip(x).map(|(w, x)| w * x).sum::<f32>() + self.bias
    }
}

impl Predictor for Linear {
    fn input_dim(&self) -> usize {
        self.weights.len()
    }

    fn predict(&self, x: &[f32]) -> machine_learning::Result<f32> {
        self.check("input", x.len(), self.weights.len())?;
        Ok(self.eval(x))
    }

    fn parameters(&self) -> Vec<f32> {
        let mut params = self.weights.clone();
        params.push(self.bias);
        params
    }

    fn set_parameters(&mut self, params: &[f32]) -> machine_learning::Result<()> {
        self.check("parameters", params.len(), self.weights.len() + 1)?;
        let (weights, bias) = params.split_at(self.weights.len());
        self.weights.copy_from_slice(weights);
        self.bias = bias[0];
        Ok(())
    }

    fn fit_batch(&mut self, xs: &[f32], ys: &[f32]) -> machine_learning::Result<f32> {
        self.check("targets", xs.len(), ys.len() * self.weights.len())?;
        let loss = self.evaluate(xs, ys)?;
        let n = ys.len().max(1) as f32;

        let mut grad_w = vec![0.; self.weights.len()];
        let mut grad_b = 0.;
        for (x, &y) in self.rows(xs).zip(ys) {
            let err = 2. * (self.eval(x) - y) / n;
            for (g, x) in grad_w.iter_mut().zip(x) {
                *g += err * x;
            }
            grad_b += err;
        }

        for (w, g) in self.weights.iter_mut().zip(grad_w) {
            *w -= self.learning_rate * g;
        }
        self.bias -= self.learning_rate * grad_b;
        Ok(loss)
    }

    fn evaluate(&self, xs: &[f32], ys: &[f32]) -> machine_learning::Result<f32> {
        self.check("targets", xs.len(), ys.len() * self.weights.len())?;
        if ys.is_empty() {
            return Ok(0.);
        }

        let sum: f32 = self
            .rows(xs)
            .zip(ys)
            .map(|(x, y)| (self.eval(x) - y).powi(2))
            .sum();
        Ok(sum / ys.len() as f32)
    }

    fn persist(&self, path: &Path) -> machine_learning::Result<()> {
        let raw: Vec<String> = self.parameters().iter().map(f32::to_string).collect();
        std::fs::write(path, raw.join(","))?;
        Ok(())
    }

    fn restore(&mut self, path: &Path) -> machine_learning::Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let params = raw
            .split(',')
            .map(|p| p.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MlErr::CorruptParameters(e.to_string()))?;
        self.set_parameters(&params)
    }
}
