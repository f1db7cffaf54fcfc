//! Data records produced by the sampler and the activity source and persisted
//! by the capture writer.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host load at one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    /// Busy CPU share over the sampling window, 0..=100.
    pub cpu_percent: f64,
    /// Used memory share (total minus available), 0..=100.
    pub mem_percent: f64,
    pub taken_at: DateTime<Utc>,
}

impl LoadSample {
    /// Builds a sample carrying only load averages. Used where utilization
    /// figures are not relevant (tests, replayed captures).
    pub fn from_loadavg(load1: f64, load5: f64, load15: f64, taken_at: DateTime<Utc>) -> Self {
        Self {
            load1,
            load5,
            load15,
            cpu_percent: 0.0,
            mem_percent: 0.0,
            taken_at,
        }
    }
}

/// One non-idle backend from `pg_stat_activity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveQueryRecord {
    pub pid: i32,
    pub user: String,
    pub database: String,
    /// `None` for Unix-socket connections and background workers.
    pub client_address: Option<String>,
    pub state: String,
    pub started_at: DateTime<Utc>,
    /// Elapsed time since `started_at`, microsecond precision.
    pub duration: Duration,
    pub wait_event_type: Option<String>,
    pub wait_event: Option<String>,
    pub sql_text: String,
}

/// Where the capture target lives. Printed in every capture header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub database: String,
}

/// A complete capture: host context plus the active queries at that moment.
///
/// Built by the scheduler without `id`/`storage_path`; the writer assigns both
/// when the file is created. Never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub server: ServerInfo,
    pub load_at_capture: LoadSample,
    /// Longest-running first.
    pub queries: Vec<ActiveQueryRecord>,
    pub storage_path: PathBuf,
}

impl CaptureRecord {
    /// Creates a record that has not been written yet.
    pub fn draft(
        created_at: DateTime<Utc>,
        server: ServerInfo,
        load_at_capture: LoadSample,
        queries: Vec<ActiveQueryRecord>,
    ) -> Self {
        Self {
            id: String::new(),
            created_at,
            server,
            load_at_capture,
            queries,
            storage_path: PathBuf::new(),
        }
    }

    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            id: self.id.clone(),
            created_at: self.created_at,
            storage_path: self.storage_path.clone(),
        }
    }
}

/// Back-reference to a capture file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureHandle {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub storage_path: PathBuf,
}

/// Sorts by duration, longest first. Stable, so equal durations keep the
/// order the server returned.
pub fn sort_by_duration_desc(queries: &mut [ActiveQueryRecord]) {
    queries.sort_by(|a, b| b.duration.cmp(&a.duration));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: i32, secs: u64) -> ActiveQueryRecord {
        ActiveQueryRecord {
            pid,
            user: "app".to_string(),
            database: "app".to_string(),
            client_address: None,
            state: "active".to_string(),
            started_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            duration: Duration::from_secs(secs),
            wait_event_type: None,
            wait_event: None,
            sql_text: "SELECT 1".to_string(),
        }
    }

    #[test]
    fn sort_puts_longest_running_first() {
        let mut queries = vec![record(1, 5), record(2, 90), record(3, 30)];
        sort_by_duration_desc(&mut queries);
        let pids: Vec<i32> = queries.iter().map(|q| q.pid).collect();
        assert_eq!(pids, vec![2, 3, 1]);
    }

    #[test]
    fn sort_keeps_server_order_for_ties() {
        let mut queries = vec![record(7, 10), record(3, 10), record(9, 10)];
        sort_by_duration_desc(&mut queries);
        let pids: Vec<i32> = queries.iter().map(|q| q.pid).collect();
        assert_eq!(pids, vec![7, 3, 9]);
    }
}
