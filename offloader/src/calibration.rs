use std::{sync::Arc, time::Instant};

use log::{debug, info};
use tokio::sync::Mutex;

use crate::{
    config::CalibrationConfig,
    error::{OffloadErr, Result},
    executor::LocalExecutor,
    store::{BenchmarkInfo, SampleStore},
};

/// Establishes the device's performance baseline, once.
pub struct Calibrator {
    store: Arc<SampleStore>,
    repeats: u32,
    lock: Mutex<()>,
}

impl Calibrator {
    /// Creates a new `Calibrator`.
    ///
    /// # Arguments
    /// * `store` - Where the baseline is read from and persisted to.
    /// * `repeats` - How many times the reference task is run.
    pub fn new(store: Arc<SampleStore>, repeats: u32) -> Self {
        Self {
            store,
            repeats: repeats.max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(store: Arc<SampleStore>, config: &CalibrationConfig) -> Self {
        Self::new(store, config.repeats)
    }

    /// Makes sure a baseline is stored, running the reference task `repeats` times if none is.
    ///
    /// Concurrent callers wait for the first one to finish; later calls don't run anything.
    ///
    /// # Arguments
    /// * `executor` - The local executor.
    /// * `reference` - The fixed reference task.
    ///
    /// # Returns
    /// The stored baseline, or the executor's error if the calibration run fails.
    pub async fn assert_calibrated<T, O, E>(
        &self,
        executor: &E,
        reference: &T,
    ) -> Result<BenchmarkInfo>
    where
        E: LocalExecutor<T, O> + ?Sized,
    {
        let _guard = self.lock.lock().await;

        if let Some(info) = self.store.benchmark_info()? {
            debug!("already calibrated");
            return Ok(info);
        }

        info!(repeats = self.repeats; "calibrating");
        let start = Instant::now();
        for _ in 0..self.repeats {
            executor
                .execute(reference)
                .await
                .map_err(OffloadErr::Calibration)?;
        }

        let total = start.elapsed();
        let info = BenchmarkInfo {
            repeats: self.repeats,
            mean_local_time_ms: total.as_micros() as f32 / 1000. / self.repeats as f32,
        };

        self.store.put_benchmark_info(&info)?;
        info!(mean_local_time_ms = info.mean_local_time_ms; "calibration done");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{error::ExecutionErr, executor::ExecResult, features::FeatureLayout};

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl LocalExecutor<u32, u32> for Counting {
        async fn execute(&self, task: &u32) -> ExecResult<u32> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(*task)
        }
    }

    struct Broken;

    #[async_trait]
    impl LocalExecutor<u32, u32> for Broken {
        async fn execute(&self, _: &u32) -> ExecResult<u32> {
            Err(ExecutionErr::fatal("no engine"))
        }
    }

    fn store() -> Arc<SampleStore> {
        Arc::new(SampleStore::in_memory(FeatureLayout::default()))
    }

    #[tokio::test]
    async fn runs_once_until_cleared() {
        let store = store();
        let calibrator = Calibrator::new(store.clone(), 3);
        let executor = Counting::default();

        let first = calibrator.assert_calibrated(&executor, &7).await.unwrap();
        assert_eq!(executor.runs.load(Ordering::SeqCst), 3);
        assert_eq!(first.repeats, 3);
        assert!(first.mean_local_time_ms >= 2.);

        let second = calibrator.assert_calibrated(&executor, &7).await.unwrap();
        assert_eq!(executor.runs.load(Ordering::SeqCst), 3);
        assert_eq!(first, second);

        store.clear().unwrap();
        calibrator.assert_calibrated(&executor, &7).await.unwrap();
        assert_eq!(executor.runs.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_run() {
        let calibrator = Arc::new(Calibrator::new(store(), 3));
        let executor = Arc::new(Counting::default());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let calibrator = calibrator.clone();
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                calibrator.assert_calibrated(&*executor, &1).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(executor.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn executor_failures_are_fatal() {
        let store = store();
        let calibrator = Calibrator::new(store.clone(), 3);

        let ret = calibrator.assert_calibrated(&Broken, &1).await;

        assert!(matches!(ret, Err(OffloadErr::Calibration(_))));
        assert_eq!(store.benchmark_info().unwrap(), None);
    }
}
