use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    features::{self, Context, TaskFeatures},
    variant::ModelVariant,
};

/// The result of calibrating the local device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkInfo {
    pub repeats: u32,
    pub mean_local_time_ms: f32,
}

impl BenchmarkInfo {
    pub fn mean_local_time(&self) -> Duration {
        Duration::from_secs_f32(self.mean_local_time_ms.max(0.) / 1000.)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSample {
    pub features: TaskFeatures,
    pub benchmark_ms: f32,
    pub actual_time_ms: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudComputationSample {
    pub features: TaskFeatures,
    pub benchmark_ms: f32,
    pub num_nodes: u32,
    pub time_of_day: f32,
    pub actual_compute_ms: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudTransmissionSample {
    pub features: TaskFeatures,
    pub benchmark_ms: f32,
    pub num_nodes: u32,
    pub rtt_ms: u32,
    pub time_of_day: f32,
    pub actual_transmit_ms: f32,
}

/// One remote execution. It's stored once and read back as both a computation and a
/// transmission sample, so both cloud variants always have the same population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRecord {
    pub features: TaskFeatures,
    pub benchmark_ms: f32,
    pub num_nodes: u32,
    pub rtt_ms: u32,
    pub time_of_day: f32,
    pub compute_ms: f32,
    pub transmit_ms: f32,
}

impl CloudRecord {
    pub fn computation(&self) -> CloudComputationSample {
        CloudComputationSample {
            features: self.features.clone(),
            benchmark_ms: self.benchmark_ms,
            num_nodes: self.num_nodes,
            time_of_day: self.time_of_day,
            actual_compute_ms: self.compute_ms,
        }
    }

    pub fn transmission(&self) -> CloudTransmissionSample {
        CloudTransmissionSample {
            features: self.features.clone(),
            benchmark_ms: self.benchmark_ms,
            num_nodes: self.num_nodes,
            rtt_ms: self.rtt_ms,
            time_of_day: self.time_of_day,
            actual_transmit_ms: self.transmit_ms,
        }
    }
}

/// An observed execution outcome, as seen by one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionSample {
    Local(LocalSample),
    CloudComputation(CloudComputationSample),
    CloudTransmission(CloudTransmissionSample),
}

impl ExecutionSample {
    pub fn variant(&self) -> ModelVariant {
        match self {
            ExecutionSample::Local(_) => ModelVariant::LocalTime,
            ExecutionSample::CloudComputation(_) => ModelVariant::CloudComputationTime,
            ExecutionSample::CloudTransmission(_) => ModelVariant::CloudTransmissionTime,
        }
    }

    /// Builds the predictor input of this sample.
    pub fn input(&self) -> Vec<f32> {
        let (task, ctx) = match self {
            ExecutionSample::Local(s) => (
                &s.features,
                Context {
                    baseline_ms: s.benchmark_ms,
                    num_nodes: 0,
                    rtt_ms: 0,
                    time_of_day: 0.,
                },
            ),
            ExecutionSample::CloudComputation(s) => (
                &s.features,
                Context {
                    baseline_ms: s.benchmark_ms,
                    num_nodes: s.num_nodes,
                    rtt_ms: 0,
                    time_of_day: s.time_of_day,
                },
            ),
            ExecutionSample::CloudTransmission(s) => (
                &s.features,
                Context {
                    baseline_ms: s.benchmark_ms,
                    num_nodes: s.num_nodes,
                    rtt_ms: s.rtt_ms,
                    time_of_day: s.time_of_day,
                },
            ),
        };

        features::build_input(self.variant(), task.as_slice(), &ctx)
    }

    /// The measured quantity, in milliseconds.
    pub fn target(&self) -> f32 {
        match self {
            ExecutionSample::Local(s) => s.actual_time_ms,
            ExecutionSample::CloudComputation(s) => s.actual_compute_ms,
            ExecutionSample::CloudTransmission(s) => s.actual_transmit_ms,
        }
    }
}
