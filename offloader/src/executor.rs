//! The collaborators the core drives but doesn't implement.

use std::time::Duration;

use async_trait::async_trait;

use crate::{error::ExecutionErr, features::TaskFeatures};

/// The result type executors and probes report with.
pub type ExecResult<T> = std::result::Result<T, ExecutionErr>;

/// Runs a task on the local device.
#[async_trait]
pub trait LocalExecutor<T, O>: Send + Sync {
    async fn execute(&self, task: &T) -> ExecResult<O>;
}

/// What the remote returns along with the task output.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOutput<O> {
    pub output: O,
    /// The time the remote spent computing, as reported by it.
    pub compute_time: Duration,
    /// The remote's node count, if it reports one.
    pub node_count: Option<u32>,
}

/// Runs a task on the remote service.
#[async_trait]
pub trait RemoteExecutor<T, O>: Send + Sync {
    async fn execute(&self, task: &T) -> ExecResult<RemoteOutput<O>>;
}

/// Turns a task into its feature vector. Must be pure.
pub trait FeatureExtractor<T>: Send + Sync {
    fn extract(&self, task: &T) -> TaskFeatures;
}

impl<T, F> FeatureExtractor<T> for F
where
    F: Fn(&T) -> TaskFeatures + Send + Sync,
{
    fn extract(&self, task: &T) -> TaskFeatures {
        self(task)
    }
}

/// The state of the network towards the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkConditions {
    pub num_nodes: u32,
    pub rtt_ms: u32,
}

/// Measures the current network conditions.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn probe(&self) -> ExecResult<NetworkConditions>;
}
