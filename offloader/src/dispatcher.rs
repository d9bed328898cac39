use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use log::{debug, error, warn};
use parking_lot::Mutex;
use rand::{Rng, rngs::StdRng};

use crate::{
    config::DispatchConfig,
    cost_model::{CostModel, Decision},
    error::{OffloadErr, Result},
    executor::{FeatureExtractor, LocalExecutor, NetworkConditions, NetworkProbe, RemoteExecutor},
    features::TaskFeatures,
    metrics::Summary,
    store::SampleStore,
    variant::ModelVariant,
};

/// Where a task actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionSite {
    Local,
    Cloud,
    /// Locally, after the remote failed.
    LocalFallback,
}

/// The output of a task along with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult<O> {
    pub output: O,
    /// The decision as taken, before any fallback.
    pub decision: Decision,
    pub actual_time_ms: f32,
    pub site: ExecutionSite,
}

/// Runs tasks where the cost model says, measuring and recording every outcome.
pub struct Dispatcher<T, O, R = StdRng> {
    cost_model: Arc<CostModel<R>>,
    store: Arc<SampleStore>,
    extractor: Box<dyn FeatureExtractor<T>>,
    local: Arc<dyn LocalExecutor<T, O>>,
    remote: Arc<dyn RemoteExecutor<T, O>>,
    network: Mutex<NetworkConditions>,
    record_samples: AtomicBool,
    summary: Mutex<Summary>,
}

impl<T, O, R: Rng + Send> Dispatcher<T, O, R> {
    /// Creates a new `Dispatcher`.
    ///
    /// # Arguments
    /// * `cost_model` - Decides the placement of each task.
    /// * `store` - Where the outcomes are recorded.
    /// * `extractor` - Turns tasks into features.
    /// * `local` - The local executor.
    /// * `remote` - The remote executor.
    pub fn new<F>(
        cost_model: Arc<CostModel<R>>,
        store: Arc<SampleStore>,
        extractor: F,
        local: Arc<dyn LocalExecutor<T, O>>,
        remote: Arc<dyn RemoteExecutor<T, O>>,
    ) -> Self
    where
        F: FeatureExtractor<T> + 'static,
    {
        Self {
            cost_model,
            store,
            extractor: Box::new(extractor),
            local,
            remote,
            network: Mutex::new(NetworkConditions::default()),
            record_samples: AtomicBool::new(true),
            summary: Mutex::new(Summary::default()),
        }
    }

    /// Applies the dispatch configuration.
    pub fn with_config(self, config: &DispatchConfig) -> Self {
        self.set_record_samples(config.record_samples);
        self
    }

    /// Turns sample recording on or off, e.g. for pure evaluation passes.
    pub fn set_record_samples(&self, record: bool) {
        self.record_samples.store(record, Ordering::Relaxed);
    }

    pub fn network_conditions(&self) -> NetworkConditions {
        *self.network.lock()
    }

    pub fn set_network_conditions(&self, conditions: NetworkConditions) {
        *self.network.lock() = conditions;
    }

    /// Probes the network and keeps the result. A failed probe keeps the previous conditions.
    pub async fn refresh_network<P>(&self, probe: &P) -> NetworkConditions
    where
        P: NetworkProbe + ?Sized,
    {
        match probe.probe().await {
            Ok(conditions) => {
                debug!(
                    num_nodes = conditions.num_nodes,
                    rtt_ms = conditions.rtt_ms;
                    "network refreshed"
                );
                self.set_network_conditions(conditions);
                conditions
            }
            Err(e) => {
                warn!("network probe failed, keeping previous conditions: {e}");
                self.network_conditions()
            }
        }
    }

    /// A snapshot of what has been executed so far.
    pub fn summary(&self) -> Summary {
        self.summary.lock().clone()
    }

    /// Executes a task where the cost model says, falling back to the local executor once if the
    /// remote fails.
    ///
    /// # Arguments
    /// * `task` - The task to execute.
    ///
    /// # Returns
    /// The output, or an error if the local executor fails or the outcome can't be recorded.
    pub async fn execute(&self, task: &T) -> Result<ExecutionResult<O>> {
        let features = self.extractor.extract(task);
        let network = self.network_conditions();
        let decision = self.cost_model.decide(&features, network)?;

        if decision.run_locally {
            return self
                .run_local(task, &features, decision, ExecutionSite::Local)
                .await;
        }

        let executed_at = SystemTime::now();
        let start = Instant::now();
        let remote = match self.remote.execute(task).await {
            Ok(remote) => remote,
            Err(e) => {
                if e.is_transient() {
                    warn!("remote execution failed, running locally: {e}");
                } else {
                    error!("remote execution failed, running locally: {e}");
                }
                self.summary.lock().fallbacks += 1;
                return self
                    .run_local(task, &features, decision, ExecutionSite::LocalFallback)
                    .await;
            }
        };

        let elapsed = start.elapsed();
        let transmit_time = elapsed.saturating_sub(remote.compute_time);

        let num_nodes = match remote.node_count {
            Some(n) => {
                self.network.lock().num_nodes = n;
                n
            }
            None => network.num_nodes,
        };

        if self.recording() {
            self.record(|store| {
                store.add_cloud_sample(
                    &features,
                    remote.compute_time,
                    transmit_time,
                    executed_at,
                    num_nodes,
                    network.rtt_ms,
                )
            })?;
        }

        let actual_time_ms = as_ms(elapsed);
        {
            let mut summary = self.summary.lock();
            summary.cloud_runs += 1;
            summary.add_time(actual_time_ms);
            if decision.predicted {
                summary.record_prediction(
                    ModelVariant::CloudComputationTime,
                    decision.cloud_compute_ms,
                    as_ms(remote.compute_time),
                );
                summary.record_prediction(
                    ModelVariant::CloudTransmissionTime,
                    decision.cloud_transmit_ms,
                    as_ms(transmit_time),
                );
            }
        }

        Ok(ExecutionResult {
            output: remote.output,
            decision,
            actual_time_ms,
            site: ExecutionSite::Cloud,
        })
    }

    async fn run_local(
        &self,
        task: &T,
        features: &TaskFeatures,
        decision: Decision,
        site: ExecutionSite,
    ) -> Result<ExecutionResult<O>> {
        let start = Instant::now();
        let output = self
            .local
            .execute(task)
            .await
            .map_err(OffloadErr::LocalExecution)?;
        let elapsed = start.elapsed();

        if self.recording() {
            self.record(|store| store.add_local_sample(features, elapsed))?;
        }

        let actual_time_ms = as_ms(elapsed);
        {
            let mut summary = self.summary.lock();
            summary.local_runs += 1;
            summary.add_time(actual_time_ms);
            if decision.predicted {
                summary.record_prediction(
                    ModelVariant::LocalTime,
                    decision.local_time_ms,
                    actual_time_ms,
                );
            }
        }

        Ok(ExecutionResult {
            output,
            decision,
            actual_time_ms,
            site,
        })
    }

    fn recording(&self) -> bool {
        self.record_samples.load(Ordering::Relaxed)
    }

    /// Runs an insert, skipping it if the device isn't calibrated yet.
    fn record<F>(&self, insert: F) -> Result<()>
    where
        F: FnOnce(&SampleStore) -> Result<()>,
    {
        match insert(&self.store) {
            Err(OffloadErr::NotCalibrated) => {
                warn!("not calibrated yet, sample not recorded");
                Ok(())
            }
            ret => ret,
        }
    }
}

fn as_ms(d: Duration) -> f32 {
    d.as_micros() as f32 / 1000.
}
