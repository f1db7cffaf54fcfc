//! Drives a full monitoring session on its loop thread.

use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pgloadwatch::collector::{ActivitySource, MockFs, SourceError, SystemSampler};
use pgloadwatch::config::{ConnectionParams, MonitorConfig};
use pgloadwatch::monitor::{Monitor, MonitorEvent};
use pgloadwatch::storage::{ActiveQueryRecord, CaptureIndex, read_capture};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(5);

struct StaticSource(Vec<ActiveQueryRecord>);

impl ActivitySource for StaticSource {
    fn fetch_active(&mut self) -> Result<Vec<ActiveQueryRecord>, SourceError> {
        Ok(self.0.clone())
    }
}

fn query(pid: i32, secs: u64, sql: &str) -> ActiveQueryRecord {
    ActiveQueryRecord {
        pid,
        user: "app".to_string(),
        database: "orders".to_string(),
        client_address: Some("10.0.0.5".to_string()),
        state: "active".to_string(),
        started_at: DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap(),
        duration: Duration::from_secs(secs),
        wait_event_type: Some("Lock".to_string()),
        wait_event: Some("relation".to_string()),
        sql_text: sql.to_string(),
    }
}

fn config(dir: &std::path::Path) -> MonitorConfig {
    MonitorConfig::new(
        2.0,
        Duration::from_secs(1),
        Duration::from_secs(60),
        dir,
        ConnectionParams::default(),
    )
    .unwrap()
    .with_intervals_unchecked(Duration::from_millis(10), Duration::from_secs(60))
}

fn wait_for<F>(rx: &Receiver<MonitorEvent>, pred: F) -> MonitorEvent
where
    F: Fn(&MonitorEvent) -> bool,
{
    let deadline = std::time::Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(std::time::Instant::now());
        let event = rx.recv_timeout(left).expect("event not received in time");
        if pred(&event) {
            return event;
        }
    }
}

#[test]
fn high_load_session_writes_capture() {
    let dir = tempdir().unwrap();
    let sampler = SystemSampler::new(MockFs::overloaded_system(3.5), "/proc")
        .with_cpu_window(Duration::ZERO);
    let source = StaticSource(vec![
        query(101, 90, "UPDATE orders\n   SET status = 'paid'\n WHERE id = 7"),
        query(102, 5, "SELECT 1"),
    ]);
    let (tx, rx) = mpsc::channel();
    let mut monitor = Monitor::new(config(dir.path()), sampler, source, tx);

    monitor.start().unwrap();
    let detected = wait_for(&rx, |e| matches!(e, MonitorEvent::HighLoadDetected { .. }));
    let MonitorEvent::HighLoadDetected { sample, threshold } = detected else {
        unreachable!();
    };
    assert_eq!(threshold, 2.0);
    assert_eq!(sample.load1, 3.5);

    let saved = wait_for(&rx, |e| matches!(e, MonitorEvent::CaptureSaved { .. }));
    monitor.stop().unwrap();

    let MonitorEvent::CaptureSaved { handle, queries } = saved else {
        unreachable!();
    };
    assert_eq!(queries, 2);
    assert_eq!(monitor.index().snapshot(), vec![handle.clone()]);

    let record = read_capture(&handle.storage_path).unwrap();
    assert_eq!(record.queries.len(), 2);
    assert_eq!(record.queries[0].pid, 101);
    assert_eq!(record.queries[0].duration, Duration::from_secs(90));
    assert_eq!(
        record.queries[0].sql_text,
        "UPDATE orders\n   SET status = 'paid'\n WHERE id = 7"
    );
    assert_eq!(record.server.database, "postgres");

    // Capture interval is a minute, so the short session wrote one file.
    assert_eq!(CaptureIndex::load_from_dir(dir.path()).unwrap().len(), 1);
}

#[test]
fn stop_mid_episode_then_restart_starts_fresh() {
    let dir = tempdir().unwrap();
    let sampler = SystemSampler::new(MockFs::overloaded_system(4.0), "/proc")
        .with_cpu_window(Duration::ZERO);
    let (tx, rx) = mpsc::channel();
    let mut monitor = Monitor::new(config(dir.path()), sampler, StaticSource(vec![]), tx);

    monitor.start().unwrap();
    wait_for(&rx, |e| *e == MonitorEvent::NoActiveQueries);
    monitor.stop().unwrap();
    let rest: Vec<_> = rx.try_iter().collect();
    assert!(
        !rest
            .iter()
            .any(|e| matches!(e, MonitorEvent::HighLoadEnded { .. }))
    );
    assert_eq!(rest.last(), Some(&MonitorEvent::MonitoringStopped));

    monitor.start().unwrap();
    wait_for(&rx, |e| matches!(e, MonitorEvent::HighLoadDetected { .. }));
    // A fresh episode captures on entry again.
    wait_for(&rx, |e| *e == MonitorEvent::NoActiveQueries);
    monitor.stop().unwrap();
}

#[test]
fn normal_load_never_captures() {
    let dir = tempdir().unwrap();
    let sampler =
        SystemSampler::new(MockFs::typical_system(), "/proc").with_cpu_window(Duration::ZERO);
    let (tx, rx) = mpsc::channel();
    let mut monitor = Monitor::new(
        config(dir.path()),
        sampler,
        StaticSource(vec![query(1, 1, "SELECT 1")]),
        tx,
    );

    monitor.start().unwrap();
    for _ in 0..3 {
        wait_for(&rx, |e| matches!(e, MonitorEvent::LoadSampled { .. }));
    }
    monitor.stop().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert!(!events.iter().any(|e| matches!(
        e,
        MonitorEvent::HighLoadDetected { .. } | MonitorEvent::CaptureSaved { .. }
    )));
    assert!(monitor.index().snapshot().is_empty());
}
