use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use comms::msg::{FitConfig, FitReport};
use log::{debug, error, info, warn};
use machine_learning::Predictor;
use parking_lot::Mutex;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{error::Result, stats::NormalizationStats, store::Dataset, variant::ModelVariant};

/// How a trainer splits and persists its data.
#[derive(Debug, Clone)]
pub struct TrainerOptions {
    /// The leading fraction of the population held out for evaluation.
    pub eval_fraction: f32,
    pub eval_batch_size: usize,
    /// Where the predictor is persisted after every update, if anywhere.
    pub model_path: Option<PathBuf>,
    /// The most epochs a single fit round runs, whatever the coordinator asks for.
    pub max_epochs: u32,
    pub seed: u64,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self {
            eval_fraction: 0.2,
            eval_batch_size: 4,
            model_path: None,
            max_epochs: 100,
            seed: 0,
        }
    }
}

/// Normalized rows, flattened row-major.
#[derive(Debug, Default)]
struct Split {
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl Split {
    fn len(&self) -> usize {
        self.ys.len()
    }
}

/// A predictor bound to a fixed snapshot of a variant's population.
pub struct Trainer {
    variant: ModelVariant,
    predictor: Mutex<Box<dyn Predictor>>,
    stats: NormalizationStats,
    dim: usize,
    train: Split,
    eval: Split,
    population: usize,
    first_round: AtomicBool,
    options: TrainerOptions,
    rng: Mutex<StdRng>,
}

impl Trainer {
    /// Creates a new `Trainer`, normalizing the population with `stats` and holding out its first
    /// `eval_fraction` for evaluation.
    ///
    /// # Arguments
    /// * `variant` - The variant being trained.
    /// * `predictor` - The predictor to train, owned by this trainer from now on.
    /// * `dataset` - The population at creation time.
    /// * `stats` - The stats of that population.
    /// * `options` - Split and persistence options.
    pub fn new(
        variant: ModelVariant,
        predictor: Box<dyn Predictor>,
        dataset: &Dataset,
        stats: NormalizationStats,
        options: TrainerOptions,
    ) -> Self {
        let dim = predictor.input_dim();
        let n_eval = (dataset.len() as f32 * options.eval_fraction) as usize;

        let mut eval = Split::default();
        let mut train = Split::default();
        for (i, (x, &y)) in dataset.inputs.iter().zip(&dataset.targets).enumerate() {
            let split = if i < n_eval { &mut eval } else { &mut train };
            split.xs.extend(stats.normalize(x));
            split.ys.push(stats.normalize_target(y));
        }

        debug!(
            variant = variant.name(),
            train = train.len(),
            eval = eval.len();
            "trainer created"
        );

        Self {
            variant,
            predictor: Mutex::new(predictor),
            stats,
            dim,
            train,
            eval,
            population: dataset.len(),
            first_round: AtomicBool::new(true),
            rng: Mutex::new(StdRng::seed_from_u64(options.seed)),
            options,
        }
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    /// The population size the trainer was created with.
    pub fn population(&self) -> usize {
        self.population
    }

    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn eval_len(&self) -> usize {
        self.eval.len()
    }

    pub fn parameters(&self) -> Vec<f32> {
        self.predictor.lock().parameters()
    }

    /// Loads `params` and trains on the train split.
    ///
    /// The first call only loads the parameters and reports a zero loss, so that the
    /// coordinator gets a reference point before any training.
    ///
    /// # Arguments
    /// * `params` - The parameters to start from.
    /// * `config` - The epochs and batch size.
    ///
    /// # Returns
    /// The updated parameters and the fit report.
    pub fn fit(&self, params: &[f32], config: FitConfig) -> Result<(Vec<f32>, FitReport)> {
        let mut predictor = self.predictor.lock();
        predictor.set_parameters(params)?;

        let num_examples = self.train.len() as u32;
        if self.first_round.swap(false, Ordering::SeqCst) {
            info!(variant = self.variant.name(); "first round, reporting a baseline");
            self.persist(&**predictor);
            return Ok((predictor.parameters(), FitReport { num_examples, loss: 0. }));
        }

        let epochs = config.epochs.min(self.options.max_epochs);
        if epochs < config.epochs {
            warn!(
                variant = self.variant.name(),
                requested = config.epochs,
                max_epochs = self.options.max_epochs;
                "clamping the epochs of a fit round"
            );
        }

        let batch_size = (config.batch_size as usize).max(1);
        let mut indices: Vec<usize> = (0..self.train.len()).collect();
        let mut epoch_losses = Vec::new();

        for _ in 0..epochs {
            indices.shuffle(&mut *self.rng.lock());

            let mut batch_losses = Vec::new();
            for batch in indices.chunks(batch_size) {
                let (xs, ys) = self.gather(batch);
                batch_losses.push(predictor.fit_batch(&xs, &ys)?);
            }

            epoch_losses.push(mean(&batch_losses));
        }

        let loss = mean(&epoch_losses);
        debug!(variant = self.variant.name(), loss = loss; "fit done");

        self.persist(&**predictor);
        Ok((predictor.parameters(), FitReport { num_examples, loss }))
    }

    /// Loads `params` and computes the loss over the eval split.
    ///
    /// # Returns
    /// The loss and the amount of evaluated samples.
    pub fn evaluate(&self, params: &[f32]) -> Result<(f32, usize)> {
        let mut predictor = self.predictor.lock();
        predictor.set_parameters(params)?;
        self.persist(&**predictor);

        let n = self.eval.len();
        if n == 0 {
            return Ok((0., 0));
        }

        let batch_size = self.options.eval_batch_size.max(1);
        let mut total = 0.;
        for (xs, ys) in self
            .eval
            .xs
            .chunks(batch_size * self.dim)
            .zip(self.eval.ys.chunks(batch_size))
        {
            total += predictor.evaluate(xs, ys)? * ys.len() as f32;
        }

        Ok((total / n as f32, n))
    }

    fn gather(&self, rows: &[usize]) -> (Vec<f32>, Vec<f32>) {
        let mut xs = Vec::with_capacity(rows.len() * self.dim);
        let mut ys = Vec::with_capacity(rows.len());
        for &i in rows {
            xs.extend_from_slice(&self.train.xs[i * self.dim..(i + 1) * self.dim]);
            ys.push(self.train.ys[i]);
        }
        (xs, ys)
    }

    /// Persisting is best effort, the in-memory parameters stay authoritative.
    fn persist(&self, predictor: &dyn Predictor) {
        let Some(path) = &self.options.model_path else {
            return;
        };

        match predictor.persist(path) {
            Ok(()) => debug!(variant = self.variant.name(); "saved model to disk"),
            Err(e) => error!(variant = self.variant.name(); "failed to save the model: {e}"),
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.;
    }

    values.iter().sum::<f32>() / values.len() as f32
}
