//! Pre-built mock filesystem scenarios for testing.
//!
//! Each scenario scripts two `/proc/stat` reads so the sampler sees a CPU
//! counter delta across its measurement window.

use super::filesystem::MockFs;

const MEMINFO: &str = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
";

const STAT_BEFORE: &str = "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 5000 250 1500 40000 500 100 50 0 0 0
cpu1 5000 250 1500 40000 500 100 50 0 0 0
intr 1000000 50 0 0 0
ctxt 500000
btime 1700000000
processes 5000
procs_running 2
procs_blocked 0
";

impl MockFs {
    /// An idle host: load 0.15, 10% CPU busy, ~26.8% memory used.
    pub fn typical_system() -> Self {
        let mut fs = Self::new();
        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file("/proc/meminfo", MEMINFO);
        fs.push_file("/proc/stat", STAT_BEFORE);
        fs.push_file(
            "/proc/stat",
            "cpu  10100 500 3000 80900 1000 200 100 0 0 0\n",
        );
        fs
    }

    /// A busy host with the given 1-minute load: 75% CPU busy.
    pub fn overloaded_system(load1: f64) -> Self {
        let mut fs = Self::new();
        fs.add_file(
            "/proc/loadavg",
            format!("{:.2} {:.2} {:.2} 12/480 9876\n", load1, load1 * 0.8, load1 * 0.5),
        );
        fs.add_file("/proc/meminfo", MEMINFO);
        fs.push_file("/proc/stat", STAT_BEFORE);
        fs.push_file(
            "/proc/stat",
            "cpu  10600 500 3150 80250 1000 200 100 0 0 0\n",
        );
        fs
    }
}
