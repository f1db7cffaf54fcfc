//! Host load sampler reading `/proc/loadavg`, `/proc/stat` and `/proc/meminfo`.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tracing::trace;

use crate::collector::procfs::parser::{parse_cpu_times, parse_loadavg, parse_meminfo};
use crate::collector::traits::FileSystem;
use crate::storage::model::LoadSample;

/// Default CPU measurement window.
pub const DEFAULT_CPU_WINDOW: Duration = Duration::from_secs(1);

/// Error type for host sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleError {
    /// The host does not expose (or we cannot read) load or utilization.
    MetricsUnavailable(String),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::MetricsUnavailable(msg) => write!(f, "metrics unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SampleError {}

/// Source of host load samples.
pub trait LoadSampler: Send {
    /// Takes one sample. May block for a short measurement window.
    fn sample(&mut self) -> Result<LoadSample, SampleError>;
}

/// Samples host load from a proc filesystem.
pub struct SystemSampler<F: FileSystem> {
    fs: F,
    proc_path: String,
    cpu_window: Duration,
}

impl<F: FileSystem> SystemSampler<F> {
    /// Creates a new sampler.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            cpu_window: DEFAULT_CPU_WINDOW,
        }
    }

    /// Sets the blocking window between the two `/proc/stat` reads.
    pub fn with_cpu_window(mut self, window: Duration) -> Self {
        self.cpu_window = window;
        self
    }

    fn read(&self, name: &str) -> Result<String, SampleError> {
        let path = format!("{}/{}", self.proc_path, name);
        self.fs
            .read_to_string(Path::new(&path))
            .map_err(|e| SampleError::MetricsUnavailable(format!("{}: {}", path, e)))
    }
}

impl<F: FileSystem> LoadSampler for SystemSampler<F> {
    fn sample(&mut self) -> Result<LoadSample, SampleError> {
        let unavailable = |e: crate::collector::procfs::parser::ParseError| {
            SampleError::MetricsUnavailable(e.message)
        };

        let cpu_before = parse_cpu_times(&self.read("stat")?).map_err(unavailable)?;
        if !self.cpu_window.is_zero() {
            std::thread::sleep(self.cpu_window);
        }
        let cpu_after = parse_cpu_times(&self.read("stat")?).map_err(unavailable)?;

        let load = parse_loadavg(&self.read("loadavg")?).map_err(unavailable)?;
        let mem = parse_meminfo(&self.read("meminfo")?).map_err(unavailable)?;

        let sample = LoadSample {
            load1: load.load1,
            load5: load.load5,
            load15: load.load15,
            cpu_percent: cpu_after.busy_percent_since(&cpu_before),
            mem_percent: mem.used_percent(),
            taken_at: Utc::now(),
        };
        trace!(
            "Sampled load {:.2} {:.2} {:.2}, cpu {:.1}%, mem {:.1}%",
            sample.load1, sample.load5, sample.load15, sample.cpu_percent, sample.mem_percent
        );
        Ok(sample)
    }
}
