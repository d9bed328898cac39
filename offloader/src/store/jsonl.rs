use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use log::warn;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};

use super::{
    backend::SampleBackend,
    sample::{BenchmarkInfo, CloudRecord, LocalSample},
};
use crate::error::{OffloadErr, Result};

const LOCAL_FILE: &str = "local.jsonl";
const CLOUD_FILE: &str = "cloud.jsonl";
const BENCHMARK_FILE: &str = "benchmark.json";

struct Counts {
    local: usize,
    cloud: usize,
}

/// A backend that appends one JSON object per line to a file per table.
pub struct JsonlBackend {
    dir: PathBuf,
    // Guards the files too, appends and clears go through it.
    counts: Mutex<Counts>,
}

impl JsonlBackend {
    /// Opens, or creates, a store rooted at `dir`.
    ///
    /// # Arguments
    /// * `dir` - The directory holding the store's files.
    ///
    /// A trailing line cut short by an interrupted append is dropped.
    ///
    /// # Returns
    /// An error if the directory can't be created or an existing file is corrupt.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        for name in [LOCAL_FILE, CLOUD_FILE] {
            drop_torn_tail(&dir.join(name))?;
        }

        let local = read_lines::<LocalSample>(&dir.join(LOCAL_FILE))?.len();
        let cloud = read_lines::<CloudRecord>(&dir.join(CLOUD_FILE))?.len();

        Ok(Self {
            dir,
            counts: Mutex::new(Counts { local, cloud }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SampleBackend for JsonlBackend {
    fn append_local(&self, sample: &LocalSample) -> Result<()> {
        let mut counts = self.counts.lock();
        append_line(&self.dir.join(LOCAL_FILE), sample)?;
        counts.local += 1;
        Ok(())
    }

    fn append_cloud(&self, record: &CloudRecord) -> Result<()> {
        let mut counts = self.counts.lock();
        append_line(&self.dir.join(CLOUD_FILE), record)?;
        counts.cloud += 1;
        Ok(())
    }

    fn local_samples(&self) -> Result<Vec<LocalSample>> {
        let _counts = self.counts.lock();
        read_lines(&self.dir.join(LOCAL_FILE))
    }

    fn cloud_records(&self) -> Result<Vec<CloudRecord>> {
        let _counts = self.counts.lock();
        read_lines(&self.dir.join(CLOUD_FILE))
    }

    fn local_count(&self) -> Result<usize> {
        Ok(self.counts.lock().local)
    }

    fn cloud_count(&self) -> Result<usize> {
        Ok(self.counts.lock().cloud)
    }

    fn benchmark(&self) -> Result<Option<BenchmarkInfo>> {
        let _counts = self.counts.lock();
        match fs::read(self.dir.join(BENCHMARK_FILE)) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_benchmark(&self, info: &BenchmarkInfo) -> Result<()> {
        let _counts = self.counts.lock();
        let path = self.dir.join(BENCHMARK_FILE);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(info)?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut counts = self.counts.lock();
        for name in [LOCAL_FILE, CLOUD_FILE, BENCHMARK_FILE] {
            match fs::remove_file(self.dir.join(name)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        counts.local = 0;
        counts.cloud = 0;
        Ok(())
    }
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();

    if let Err(e) = file.write_all(&line).and_then(|()| file.sync_data()) {
        // Best effort, `open` drops whatever is left.
        let _ = file.set_len(len);
        return Err(e.into());
    }

    Ok(())
}

/// Truncates a file after its last newline.
fn drop_torn_tail(path: &Path) -> Result<()> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let keep = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    if keep == bytes.len() {
        return Ok(());
    }

    warn!(
        path:% = path.display(), dropped = bytes.len() - keep;
        "dropping an interrupted append"
    );
    OpenOptions::new()
        .write(true)
        .open(path)?
        .set_len(keep as u64)?;
    Ok(())
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut rows = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let row = serde_json::from_str(&line).map_err(|e| {
            OffloadErr::Store(format!("{}:{}: {e}", path.display(), i + 1))
        })?;
        rows.push(row);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::TaskFeatures;

    fn local(x: f32) -> LocalSample {
        LocalSample {
            features: TaskFeatures(vec![x]),
            benchmark_ms: 20.,
            actual_time_ms: 10. + x,
        }
    }

    fn cloud(x: f32) -> CloudRecord {
        CloudRecord {
            features: TaskFeatures(vec![x]),
            benchmark_ms: 20.,
            num_nodes: 2,
            rtt_ms: 15,
            time_of_day: 0.5,
            compute_ms: 30.,
            transmit_ms: 12.,
        }
    }

    #[test]
    fn samples_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = JsonlBackend::open(dir.path()).unwrap();
            for x in 0..3 {
                backend.append_local(&local(x as f32)).unwrap();
            }
            backend.append_cloud(&cloud(1.)).unwrap();
        }

        let backend = JsonlBackend::open(dir.path()).unwrap();
        assert_eq!(backend.local_count().unwrap(), 3);
        assert_eq!(backend.cloud_count().unwrap(), 1);
        assert_eq!(backend.local_samples().unwrap()[2], local(2.));
        assert_eq!(backend.cloud_records().unwrap(), vec![cloud(1.)]);
    }

    #[test]
    fn benchmark_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let info = BenchmarkInfo {
            repeats: 3,
            mean_local_time_ms: 42.5,
        };

        let backend = JsonlBackend::open(dir.path()).unwrap();
        assert_eq!(backend.benchmark().unwrap(), None);
        backend.put_benchmark(&info).unwrap();
        drop(backend);

        let backend = JsonlBackend::open(dir.path()).unwrap();
        assert_eq!(backend.benchmark().unwrap(), Some(info));
    }

    #[test]
    fn clear_removes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonlBackend::open(dir.path()).unwrap();
        backend.append_local(&local(1.)).unwrap();
        backend.append_cloud(&cloud(1.)).unwrap();
        backend
            .put_benchmark(&BenchmarkInfo {
                repeats: 1,
                mean_local_time_ms: 1.,
            })
            .unwrap();

        backend.clear().unwrap();

        for name in [LOCAL_FILE, CLOUD_FILE, BENCHMARK_FILE] {
            assert!(!dir.path().join(name).exists(), "{name} is still there");
        }
        assert_eq!(backend.local_count().unwrap(), 0);
        assert_eq!(backend.cloud_count().unwrap(), 0);
        assert_eq!(backend.benchmark().unwrap(), None);
    }

    #[test]
    fn interrupted_appends_are_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = JsonlBackend::open(dir.path()).unwrap();
            for x in 0..3 {
                backend.append_local(&local(x as f32)).unwrap();
            }
        }

        let path = dir.path().join(LOCAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"features":[1.0],"bench"#).unwrap();
        drop(file);

        let backend = JsonlBackend::open(dir.path()).unwrap();
        assert_eq!(backend.local_count().unwrap(), 3);

        backend.append_local(&local(7.)).unwrap();
        let samples = backend.local_samples().unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[3], local(7.));
    }
}
