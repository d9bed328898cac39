//! Construction of the predictor input vectors.
//!
//! Every vector starts with the calibration baseline, followed by the task features and then the
//! variant's context features. The order is part of the trained models' contract.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{
    error::{OffloadErr, Result},
    variant::ModelVariant,
};

pub const BASELINE_DIVISOR: f32 = 1000.;
pub const NODES_DIVISOR: f32 = 10.;
pub const RTT_DIVISOR: f32 = 1000.;

const SECONDS_PER_DAY: u64 = 86_400;

/// A fixed size numeric description of one task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskFeatures(pub Vec<f32>);

impl TaskFeatures {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for TaskFeatures {
    fn from(value: Vec<f32>) -> Self {
        Self(value)
    }
}

/// Describes the task feature vectors the extractor produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub task_dims: usize,
    /// Task dimensions already bounded (ratios, counts) that must not be re-centered.
    #[serde(default)]
    pub unstandardized_task_dims: Vec<usize>,
}

impl Default for FeatureLayout {
    fn default() -> Self {
        Self::new(1, Vec::new())
    }
}

impl FeatureLayout {
    pub fn new(task_dims: usize, unstandardized_task_dims: Vec<usize>) -> Self {
        Self {
            task_dims,
            unstandardized_task_dims,
        }
    }

    /// Checks that a feature vector matches this layout.
    pub fn check(&self, features: &TaskFeatures) -> Result<()> {
        if features.len() != self.task_dims {
            return Err(OffloadErr::InvalidConfig(format!(
                "task features have {} dimensions, the layout expects {}",
                features.len(),
                self.task_dims
            )));
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(d) = self
            .unstandardized_task_dims
            .iter()
            .find(|&&d| d >= self.task_dims)
        {
            return Err(OffloadErr::InvalidConfig(format!(
                "unstandardized task dimension {d} is out of range for {} task dimensions",
                self.task_dims
            )));
        }

        Ok(())
    }
}

/// The context an input vector is built in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Context {
    pub baseline_ms: f32,
    pub num_nodes: u32,
    pub rtt_ms: u32,
    pub time_of_day: f32,
}

/// Builds the input vector of a variant.
///
/// # Arguments
/// * `variant` - The variant the vector is for.
/// * `task` - The raw task features.
/// * `ctx` - The calibration baseline and the network context.
///
/// # Returns
/// A vector of `variant.input_dim(layout)` features.
pub fn build_input(variant: ModelVariant, task: &[f32], ctx: &Context) -> Vec<f32> {
    let mut x = Vec::with_capacity(task.len() + 4);
    x.push(ctx.baseline_ms / BASELINE_DIVISOR);
    x.extend_from_slice(task);

    match variant {
        ModelVariant::LocalTime => {}
        ModelVariant::CloudComputationTime => {
            x.push(ctx.num_nodes as f32 / NODES_DIVISOR);
            x.push(ctx.time_of_day);
        }
        ModelVariant::CloudTransmissionTime => {
            x.push(ctx.num_nodes as f32 / NODES_DIVISOR);
            x.push(ctx.rtt_ms as f32 / RTT_DIVISOR);
            x.push(ctx.time_of_day);
        }
    }

    x
}

/// Maps a point in time to the fraction of the UTC day elapsed, in `[0, 1)`.
pub fn time_of_day(at: SystemTime) -> f32 {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    (secs % SECONDS_PER_DAY) as f32 / SECONDS_PER_DAY as f32
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn input_vectors_follow_the_variant_order() {
        let ctx = Context {
            baseline_ms: 300.,
            num_nodes: 5,
            rtt_ms: 250,
            time_of_day: 0.5,
        };
        let task = [7., 8.];

        assert_eq!(build_input(ModelVariant::LocalTime, &task, &ctx), vec![0.3, 7., 8.]);
        assert_eq!(
            build_input(ModelVariant::CloudComputationTime, &task, &ctx),
            vec![0.3, 7., 8., 0.5, 0.5]
        );
        assert_eq!(
            build_input(ModelVariant::CloudTransmissionTime, &task, &ctx),
            vec![0.3, 7., 8., 0.5, 0.25, 0.5]
        );
    }

    #[test]
    fn time_of_day_wraps_at_midnight() {
        let noon = UNIX_EPOCH + Duration::from_secs(3 * SECONDS_PER_DAY + SECONDS_PER_DAY / 2);
        assert_eq!(time_of_day(noon), 0.5);
        assert_eq!(time_of_day(UNIX_EPOCH + Duration::from_secs(SECONDS_PER_DAY)), 0.);
    }

    #[test]
    fn out_of_range_unstandardized_dims_are_rejected() {
        assert!(FeatureLayout::new(2, vec![2]).validate().is_err());
        assert!(FeatureLayout::new(2, vec![1]).validate().is_ok());
    }
}
