use std::fmt;

use serde::{Deserialize, Serialize};

use crate::features::FeatureLayout;

/// The quantity a predictor estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    LocalTime,
    CloudComputationTime,
    CloudTransmissionTime,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 3] = [
        ModelVariant::LocalTime,
        ModelVariant::CloudComputationTime,
        ModelVariant::CloudTransmissionTime,
    ];

    /// A short stable name, used for logging and file names.
    pub fn name(&self) -> &'static str {
        match self {
            ModelVariant::LocalTime => "local_time",
            ModelVariant::CloudComputationTime => "cloud_computation_time",
            ModelVariant::CloudTransmissionTime => "cloud_transmission_time",
        }
    }

    /// The position of this variant in `ALL`, used to index per variant tables.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The amount of context features that follow the task features.
    fn context_dims(&self) -> usize {
        match self {
            ModelVariant::LocalTime => 0,
            // node count, time of day
            ModelVariant::CloudComputationTime => 2,
            // node count, rtt, time of day
            ModelVariant::CloudTransmissionTime => 3,
        }
    }

    /// Returns the size of this variant's input vectors.
    ///
    /// # Arguments
    /// * `layout` - The task feature layout.
    pub fn input_dim(&self, layout: &FeatureLayout) -> usize {
        1 + layout.task_dims + self.context_dims()
    }

    /// Returns the input dimensions excluded from standardization: the calibration baseline, the
    /// task dimensions flagged in `layout` and the time of day.
    ///
    /// # Arguments
    /// * `layout` - The task feature layout.
    pub fn unstandardized_dims(&self, layout: &FeatureLayout) -> Vec<usize> {
        let mut dims = vec![0];
        dims.extend(layout.unstandardized_task_dims.iter().map(|d| d + 1));
        if self.context_dims() > 0 {
            dims.push(self.input_dim(layout) - 1);
        }
        dims
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
