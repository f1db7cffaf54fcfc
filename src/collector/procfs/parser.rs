//! Parsers for the `/proc` files the sampler needs.

/// Error type for `/proc` parsing failures.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parsed data from `/proc/loadavg`.
#[derive(Debug, Clone, Default)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

/// Parses `/proc/loadavg` content.
pub fn parse_loadavg(content: &str) -> Result<LoadAvg, ParseError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(ParseError::new("invalid loadavg format"));
    }

    let parse_load = |idx: usize, name: &str| -> Result<f64, ParseError> {
        parts[idx]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| ParseError::new(format!("invalid {}", name)))
    };
    let load1 = parse_load(0, "load1")?;
    let load5 = parse_load(1, "load5")?;
    let load15 = parse_load(2, "load15")?;

    Ok(LoadAvg {
        load1,
        load5,
        load15,
    })
}

/// Memory figures from `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_available: u64,
    // Only feed the `MemAvailable` estimate.
    mem_free: u64,
    buffers: u64,
    cached: u64,
}

impl MemInfo {
    /// Used share of memory, 0..=100.
    pub fn used_percent(&self) -> f64 {
        let used = self.mem_total.saturating_sub(self.mem_available);
        (used as f64 / self.mem_total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Parses `/proc/meminfo` content.
///
/// Kernels older than 3.14 lack `MemAvailable`; it is then estimated as
/// free + buffers + cached.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();
    let mut has_available = false;

    let parse_kb = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            info.mem_total = parse_kb(line);
        } else if line.starts_with("MemFree:") {
            info.mem_free = parse_kb(line);
        } else if line.starts_with("MemAvailable:") {
            info.mem_available = parse_kb(line);
            has_available = true;
        } else if line.starts_with("Buffers:") {
            info.buffers = parse_kb(line);
        } else if line.starts_with("Cached:") {
            info.cached = parse_kb(line);
        }
    }

    if info.mem_total == 0 {
        return Err(ParseError::new("MemTotal missing"));
    }
    if !has_available {
        info.mem_available = info.mem_free + info.buffers + info.cached;
    }

    Ok(info)
}

/// Aggregate `cpu` line of `/proc/stat`, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// All ticks. Guest time is already accounted in `user`/`nice`.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Busy share between two readings, 0..=100. Zero when no ticks elapsed.
    pub fn busy_percent_since(&self, before: &CpuTimes) -> f64 {
        let total = self.total().saturating_sub(before.total());
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle_total().saturating_sub(before.idle_total());
        let busy = total.saturating_sub(idle);
        (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Parses the aggregate `cpu` line from `/proc/stat` content.
pub fn parse_cpu_times(content: &str) -> Result<CpuTimes, ParseError> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ParseError::new("aggregate cpu line missing"))?;

    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|s| s.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ParseError::new("invalid cpu counters"))?;
    if values.len() < 4 {
        return Err(ParseError::new("too few cpu counters"));
    }

    let get = |idx: usize| values.get(idx).copied().unwrap_or(0);
    Ok(CpuTimes {
        user: get(0),
        nice: get(1),
        system: get(2),
        idle: get(3),
        iowait: get(4),
        irq: get(5),
        softirq: get(6),
        steal: get(7),
    })
}
