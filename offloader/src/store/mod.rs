//! Persisted execution samples and the statistics derived from them.

mod backend;
mod jsonl;
mod sample;

use std::time::{Duration, SystemTime};

use log::debug;
use parking_lot::RwLock;

pub use backend::{MemoryBackend, SampleBackend};
pub use jsonl::JsonlBackend;
pub use sample::{
    BenchmarkInfo, CloudComputationSample, CloudRecord, CloudTransmissionSample, ExecutionSample,
    LocalSample,
};

use crate::{
    error::{OffloadErr, Result},
    features::{self, FeatureLayout, TaskFeatures},
    stats::NormalizationStats,
    variant::ModelVariant,
};

/// A callback invoked after every insert with the variant that grew.
pub type Observer = Box<dyn Fn(ModelVariant) -> Result<()> + Send + Sync>;

/// The inputs and targets of one variant's whole population.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub inputs: Vec<Vec<f32>>,
    pub targets: Vec<f32>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// The append-only store of execution samples.
///
/// Observers registered with `on_updated` run synchronously, in registration order, on the
/// inserting thread. The first observer error is returned to the inserting caller and the
/// remaining observers are skipped; the sample stays stored. An observer must not register
/// further observers.
pub struct SampleStore {
    backend: Box<dyn SampleBackend>,
    layout: FeatureLayout,
    observers: RwLock<Vec<Observer>>,
}

impl SampleStore {
    /// Creates a new `SampleStore`.
    ///
    /// # Arguments
    /// * `backend` - Where samples are persisted.
    /// * `layout` - The layout of the task features that will be added.
    pub fn new<B: SampleBackend + 'static>(backend: B, layout: FeatureLayout) -> Self {
        Self {
            backend: Box::new(backend),
            layout,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Creates a store that keeps everything in memory.
    pub fn in_memory(layout: FeatureLayout) -> Self {
        Self::new(MemoryBackend::new(), layout)
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    /// Records a local execution.
    ///
    /// # Arguments
    /// * `features` - The task's features.
    /// * `elapsed` - The measured execution time.
    ///
    /// # Returns
    /// An error if the device isn't calibrated, the backend fails or an observer fails.
    pub fn add_local_sample(&self, features: &TaskFeatures, elapsed: Duration) -> Result<()> {
        self.layout.check(features)?;
        let benchmark = self.require_benchmark()?;

        self.backend.append_local(&LocalSample {
            features: features.clone(),
            benchmark_ms: benchmark.mean_local_time_ms,
            actual_time_ms: as_ms(elapsed),
        })?;

        debug!(variant = ModelVariant::LocalTime.name(); "added sample");
        self.notify(ModelVariant::LocalTime)
    }

    /// Records a remote execution, which feeds both cloud variants.
    ///
    /// # Arguments
    /// * `features` - The task's features.
    /// * `compute_time` - The compute time reported by the remote.
    /// * `transmit_time` - The rest of the round trip.
    /// * `executed_at` - When the task was sent.
    /// * `num_nodes` - The remote's node count at the time.
    /// * `rtt_ms` - The network round trip time at the time.
    pub fn add_cloud_sample(
        &self,
        features: &TaskFeatures,
        compute_time: Duration,
        transmit_time: Duration,
        executed_at: SystemTime,
        num_nodes: u32,
        rtt_ms: u32,
    ) -> Result<()> {
        self.layout.check(features)?;
        let benchmark = self.require_benchmark()?;

        self.backend.append_cloud(&CloudRecord {
            features: features.clone(),
            benchmark_ms: benchmark.mean_local_time_ms,
            num_nodes,
            rtt_ms,
            time_of_day: features::time_of_day(executed_at),
            compute_ms: as_ms(compute_time),
            transmit_ms: as_ms(transmit_time),
        })?;

        debug!(num_nodes = num_nodes, rtt_ms = rtt_ms; "added cloud sample");
        self.notify(ModelVariant::CloudComputationTime)?;
        self.notify(ModelVariant::CloudTransmissionTime)
    }

    /// Returns every sample of a variant.
    pub fn samples(&self, variant: ModelVariant) -> Result<Vec<ExecutionSample>> {
        Ok(match variant {
            ModelVariant::LocalTime => self
                .backend
                .local_samples()?
                .into_iter()
                .map(ExecutionSample::Local)
                .collect(),
            ModelVariant::CloudComputationTime => self
                .backend
                .cloud_records()?
                .iter()
                .map(|r| ExecutionSample::CloudComputation(r.computation()))
                .collect(),
            ModelVariant::CloudTransmissionTime => self
                .backend
                .cloud_records()?
                .iter()
                .map(|r| ExecutionSample::CloudTransmission(r.transmission()))
                .collect(),
        })
    }

    /// Materializes a variant's whole population as predictor inputs and targets.
    pub fn get_samples(&self, variant: ModelVariant) -> Result<Dataset> {
        let samples = self.samples(variant)?;
        let dim = variant.input_dim(&self.layout);

        let mut dataset = Dataset::default();
        for sample in samples {
            let input = sample.input();
            if input.len() != dim {
                return Err(OffloadErr::Store(format!(
                    "stored {variant} sample has {} features, expected {dim}",
                    input.len()
                )));
            }

            dataset.targets.push(sample.target());
            dataset.inputs.push(input);
        }

        Ok(dataset)
    }

    /// Computes a variant's normalization stats over its current population.
    pub fn get_stats(&self, variant: ModelVariant) -> Result<NormalizationStats> {
        let dataset = self.get_samples(variant)?;
        Ok(stats_of(&dataset, variant, &self.layout))
    }

    /// Returns the stored calibration, if any.
    pub fn benchmark_info(&self) -> Result<Option<BenchmarkInfo>> {
        self.backend.benchmark()
    }

    pub fn put_benchmark_info(&self, info: &BenchmarkInfo) -> Result<()> {
        self.backend.put_benchmark(info)
    }

    /// Deletes every sample and the calibration. Observers stay registered.
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }

    pub fn size(&self, variant: ModelVariant) -> Result<usize> {
        match variant {
            ModelVariant::LocalTime => self.backend.local_count(),
            ModelVariant::CloudComputationTime | ModelVariant::CloudTransmissionTime => {
                self.backend.cloud_count()
            }
        }
    }

    /// Registers an observer called after each insert.
    pub fn on_updated<F>(&self, observer: F)
    where
        F: Fn(ModelVariant) -> Result<()> + Send + Sync + 'static,
    {
        self.observers.write().push(Box::new(observer));
    }

    fn notify(&self, variant: ModelVariant) -> Result<()> {
        for observer in self.observers.read().iter() {
            observer(variant)?;
        }

        Ok(())
    }

    fn require_benchmark(&self) -> Result<BenchmarkInfo> {
        self.backend.benchmark()?.ok_or(OffloadErr::NotCalibrated)
    }
}

/// Computes the normalization stats of a materialized population.
pub fn stats_of(
    dataset: &Dataset,
    variant: ModelVariant,
    layout: &FeatureLayout,
) -> NormalizationStats {
    NormalizationStats::compute(
        &dataset.inputs,
        &dataset.targets,
        variant.input_dim(layout),
        &variant.unstandardized_dims(layout),
    )
}

fn as_ms(d: Duration) -> f32 {
    d.as_micros() as f32 / 1000.
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use parking_lot::Mutex;

    use super::*;

    fn calibrated_store() -> SampleStore {
        let store = SampleStore::in_memory(FeatureLayout::new(2, vec![1]));
        store
            .put_benchmark_info(&BenchmarkInfo {
                repeats: 3,
                mean_local_time_ms: 300.,
            })
            .unwrap();
        store
    }

    fn task(a: f32, b: f32) -> TaskFeatures {
        TaskFeatures(vec![a, b])
    }

    #[test]
    fn samples_need_a_calibration() {
        let store = SampleStore::in_memory(FeatureLayout::new(2, vec![]));
        assert!(matches!(
            store.add_local_sample(&task(1., 2.), Duration::from_millis(5)),
            Err(OffloadErr::NotCalibrated)
        ));
        assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 0);
    }

    #[test]
    fn features_must_match_the_layout() {
        let store = calibrated_store();
        let err = store.add_local_sample(&TaskFeatures(vec![1.]), Duration::from_millis(5));
        assert!(matches!(err, Err(OffloadErr::InvalidConfig(_))));
    }

    #[test]
    fn local_samples_carry_the_baseline() {
        let store = calibrated_store();
        store
            .add_local_sample(&task(5., 0.5), Duration::from_millis(120))
            .unwrap();

        let dataset = store.get_samples(ModelVariant::LocalTime).unwrap();
        assert_eq!(dataset.inputs, vec![vec![0.3, 5., 0.5]]);
        assert_eq!(dataset.targets, vec![120.]);
    }

    #[test]
    fn one_cloud_sample_feeds_both_cloud_variants() {
        let store = calibrated_store();
        let notified = Arc::new(Mutex::new(Vec::new()));
        let seen = notified.clone();
        store.on_updated(move |v| {
            seen.lock().push(v);
            Ok(())
        });

        store
            .add_cloud_sample(
                &task(1., 0.),
                Duration::from_millis(80),
                Duration::from_millis(40),
                SystemTime::UNIX_EPOCH,
                4,
                100,
            )
            .unwrap();

        assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 0);
        assert_eq!(store.size(ModelVariant::CloudComputationTime).unwrap(), 1);
        assert_eq!(store.size(ModelVariant::CloudTransmissionTime).unwrap(), 1);
        assert_eq!(
            *notified.lock(),
            vec![
                ModelVariant::CloudComputationTime,
                ModelVariant::CloudTransmissionTime
            ]
        );

        let compute = store.get_samples(ModelVariant::CloudComputationTime).unwrap();
        assert_eq!(compute.inputs, vec![vec![0.3, 1., 0., 0.4, 0.]]);
        assert_eq!(compute.targets, vec![80.]);

        let transmit = store.get_samples(ModelVariant::CloudTransmissionTime).unwrap();
        assert_eq!(transmit.inputs, vec![vec![0.3, 1., 0., 0.4, 0.1, 0.]]);
        assert_eq!(transmit.targets, vec![40.]);
    }

    #[test]
    fn observers_run_in_registration_order() {
        let store = calibrated_store();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            store.on_updated(move |_| {
                order.lock().push(id);
                Ok(())
            });
        }

        store
            .add_local_sample(&task(1., 1.), Duration::from_millis(1))
            .unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn observer_errors_reach_the_caller() {
        let store = calibrated_store();
        let after = Arc::new(AtomicUsize::new(0));
        store.on_updated(|_| Err(OffloadErr::Store("observer failed".into())));
        let counter = after.clone();
        store.on_updated(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let ret = store.add_local_sample(&task(1., 1.), Duration::from_millis(1));

        assert!(matches!(ret, Err(OffloadErr::Store(_))));
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 1);
    }

    #[test]
    fn stats_skip_unstandardized_dims() {
        let store = calibrated_store();
        for (a, b, ms) in [(1., 0.2, 100), (3., 0.9, 200), (5., 0.4, 300)] {
            store
                .add_local_sample(&task(a, b), Duration::from_millis(ms))
                .unwrap();
        }

        let stats = store.get_stats(ModelVariant::LocalTime).unwrap();
        // baseline and the second task dimension are left alone
        assert_eq!(stats.feature_means[0], 0.);
        assert_eq!(stats.feature_stds[0], 1.);
        assert_eq!(stats.feature_means[2], 0.);
        assert_eq!(stats.feature_stds[2], 1.);
        assert_eq!(stats.feature_means[1], 3.);
        assert!((stats.target_mean - 200.).abs() < 1e-3);
    }

    #[test]
    fn clear_wipes_samples_and_calibration_but_keeps_observers() {
        let store = calibrated_store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.on_updated(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        store
            .add_local_sample(&task(1., 1.), Duration::from_millis(1))
            .unwrap();
        store.clear().unwrap();

        assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 0);
        assert_eq!(store.benchmark_info().unwrap(), None);

        store
            .put_benchmark_info(&BenchmarkInfo {
                repeats: 1,
                mean_local_time_ms: 10.,
            })
            .unwrap();
        store
            .add_local_sample(&task(1., 1.), Duration::from_millis(1))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
