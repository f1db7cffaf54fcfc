//! Read-side facades over the host and the database server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │        SystemSampler         │   │    PostgresActivitySource    │
//! │  - /proc/loadavg             │   │  - pg_stat_activity          │
//! │  - /proc/stat (two reads)    │   │  - lazy, reused connection   │
//! │  - /proc/meminfo             │   └──────────────────────────────┘
//! └──────────────┬───────────────┘
//!                │
//!         ┌──────▼──────┐
//!         │  FileSystem │ (trait)
//!         └──────┬──────┘
//!         ┌──────┴──────┐
//!   ┌─────▼─────┐ ┌─────▼─────┐
//!   │  RealFs   │ │  MockFs   │
//!   └───────────┘ └───────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use pgloadwatch::collector::{LoadSampler, MockFs, SystemSampler};
//! use std::time::Duration;
//!
//! let fs = MockFs::typical_system();
//! let mut sampler = SystemSampler::new(fs, "/proc").with_cpu_window(Duration::ZERO);
//! let sample = sampler.sample().unwrap();
//! assert!(sample.load1 < 1.0);
//! ```

pub mod mock;
mod pg_collector;
pub mod procfs;
pub mod traits;

pub use mock::MockFs;
pub use pg_collector::{ActivitySource, PostgresActivitySource, SourceError};
pub use procfs::{DEFAULT_CPU_WINDOW, LoadSampler, SampleError, SystemSampler};
pub use traits::{FileSystem, RealFs};
