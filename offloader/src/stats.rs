use serde::{Deserialize, Serialize};

/// Per variant feature and target moments used to rescale data around a predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub feature_means: Vec<f32>,
    pub feature_stds: Vec<f32>,
    pub target_mean: f32,
    pub target_std: f32,
}

impl NormalizationStats {
    /// Stats that leave every value untouched.
    pub fn identity(dim: usize) -> Self {
        Self {
            feature_means: vec![0.; dim],
            feature_stds: vec![1.; dim],
            target_mean: 0.,
            target_std: 1.,
        }
    }

    /// Computes the population mean and standard deviation of every input dimension and of the
    /// target.
    ///
    /// # Arguments
    /// * `inputs` - The input vectors, each of `dim` features.
    /// * `targets` - The targets, one per input.
    /// * `dim` - The input dimension.
    /// * `unstandardized` - Dimensions forced to mean 0 and std 1.
    ///
    /// # Returns
    /// The stats. A standard deviation that would be zero, or that comes from fewer than two
    /// points, is 1.
    pub fn compute(
        inputs: &[Vec<f32>],
        targets: &[f32],
        dim: usize,
        unstandardized: &[usize],
    ) -> Self {
        let mut stats = Self::identity(dim);
        let n = inputs.len();
        if n == 0 {
            return stats;
        }

        for d in 0..dim {
            if unstandardized.contains(&d) {
                continue;
            }

            let (mean, std) = moments(inputs.iter().map(|x| x[d]), n);
            stats.feature_means[d] = mean;
            stats.feature_stds[d] = std;
        }

        let (mean, std) = moments(targets.iter().copied(), targets.len());
        stats.target_mean = mean;
        stats.target_std = std;
        stats
    }

    /// Standardizes an input vector elementwise.
    pub fn normalize(&self, x: &[f32]) -> Vec<f32> {
        x.iter()
            .zip(&self.feature_means)
            .zip(&self.feature_stds)
            .map(|((x, mean), std)| (x - mean) / std)
            .collect()
    }

    /// Reverts `normalize`.
    pub fn denormalize(&self, x: &[f32]) -> Vec<f32> {
        x.iter()
            .zip(&self.feature_means)
            .zip(&self.feature_stds)
            .map(|((x, mean), std)| x * std + mean)
            .collect()
    }

    pub fn normalize_target(&self, y: f32) -> f32 {
        (y - self.target_mean) / self.target_std
    }

    pub fn denormalize_target(&self, y: f32) -> f32 {
        y * self.target_std + self.target_mean
    }
}

fn moments(values: impl Iterator<Item = f32> + Clone, n: usize) -> (f32, f32) {
    if n == 0 {
        return (0., 1.);
    }

    let n_f = n as f64;
    let mean = values.clone().map(f64::from).sum::<f64>() / n_f;
    if n < 2 {
        return (mean as f32, 1.);
    }

    let var = values.map(|v| (f64::from(v) - mean).powi(2)).sum::<f64>() / n_f;
    let std = var.sqrt() as f32;

    if std > 0. && std.is_finite() {
        (mean as f32, std)
    } else {
        (mean as f32, 1.)
    }
}
