use crate::variant::ModelVariant;

/// Running prediction errors of one variant.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PredictionErrors {
    pub count: u64,
    sum_sq: f64,
    sum_abs: f64,
}

impl PredictionErrors {
    #[inline]
    pub fn push(&mut self, predicted: f32, actual: f32) {
        let e = f64::from(predicted) - f64::from(actual);
        self.count += 1;
        self.sum_sq += e * e;
        self.sum_abs += e.abs();
    }

    pub fn rmse(&self) -> Option<f64> {
        (self.count > 0).then(|| (self.sum_sq / self.count as f64).sqrt())
    }

    pub fn mae(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_abs / self.count as f64)
    }
}

/// What the dispatcher did so far. Lives in memory only.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub local_runs: u64,
    pub cloud_runs: u64,
    pub fallbacks: u64,
    pub total_time_ms: f64,
    errors: [PredictionErrors; 3],
}

impl Summary {
    #[inline]
    pub fn record_prediction(&mut self, variant: ModelVariant, predicted: f32, actual: f32) {
        self.errors[variant.index()].push(predicted, actual);
    }

    #[inline]
    pub fn add_time(&mut self, ms: f32) {
        self.total_time_ms += f64::from(ms);
    }

    pub fn errors(&self, variant: ModelVariant) -> &PredictionErrors {
        &self.errors[variant.index()]
    }

    pub fn executions(&self) -> u64 {
        self.local_runs + self.cloud_runs
    }

    pub fn mean_time_ms(&self) -> Option<f64> {
        let n = self.executions();
        (n > 0).then(|| self.total_time_ms / n as f64)
    }
}
