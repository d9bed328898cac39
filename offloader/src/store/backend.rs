use parking_lot::Mutex;

use super::sample::{BenchmarkInfo, CloudRecord, LocalSample};
use crate::error::Result;

/// Durable storage for samples and calibration info.
///
/// Implementations serialize their own appends, so a store can be shared by concurrent
/// dispatchers.
pub trait SampleBackend: Send + Sync {
    fn append_local(&self, sample: &LocalSample) -> Result<()>;
    fn append_cloud(&self, record: &CloudRecord) -> Result<()>;
    fn local_samples(&self) -> Result<Vec<LocalSample>>;
    fn cloud_records(&self) -> Result<Vec<CloudRecord>>;
    fn local_count(&self) -> Result<usize>;
    fn cloud_count(&self) -> Result<usize>;

    /// Returns the most recently stored calibration, if any.
    fn benchmark(&self) -> Result<Option<BenchmarkInfo>>;
    fn put_benchmark(&self, info: &BenchmarkInfo) -> Result<()>;

    /// Deletes every sample and the calibration.
    fn clear(&self) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    local: Vec<LocalSample>,
    cloud: Vec<CloudRecord>,
    benchmark: Option<BenchmarkInfo>,
}

/// A backend that keeps everything in memory, lost with the process.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleBackend for MemoryBackend {
    fn append_local(&self, sample: &LocalSample) -> Result<()> {
        self.tables.lock().local.push(sample.clone());
        Ok(())
    }

    fn append_cloud(&self, record: &CloudRecord) -> Result<()> {
        self.tables.lock().cloud.push(record.clone());
        Ok(())
    }

    fn local_samples(&self) -> Result<Vec<LocalSample>> {
        Ok(self.tables.lock().local.clone())
    }

    fn cloud_records(&self) -> Result<Vec<CloudRecord>> {
        Ok(self.tables.lock().cloud.clone())
    }

    fn local_count(&self) -> Result<usize> {
        Ok(self.tables.lock().local.len())
    }

    fn cloud_count(&self) -> Result<usize> {
        Ok(self.tables.lock().cloud.len())
    }

    fn benchmark(&self) -> Result<Option<BenchmarkInfo>> {
        Ok(self.tables.lock().benchmark)
    }

    fn put_benchmark(&self, info: &BenchmarkInfo) -> Result<()> {
        self.tables.lock().benchmark = Some(*info);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tables.lock() = Tables::default();
        Ok(())
    }
}
