//! Start/stop handle around the monitoring loop thread.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::collector::{ActivitySource, LoadSampler};
use crate::config::{ConfigError, MonitorConfig};
use crate::storage::{CaptureIndex, CaptureWriter, SharedCaptureIndex};

use super::event::{EventSink, MonitorEvent};
use super::scheduler::{CaptureScheduler, Control};

/// Error type for control requests.
#[derive(Debug)]
pub enum MonitorError {
    /// Rejected configuration change; the previous value stays in effect.
    Config(ConfigError),
    /// The loop thread could not be started.
    Spawn(std::io::Error),
    /// The loop thread panicked or never started; the session components
    /// are gone and the monitor cannot be restarted.
    SessionLost,
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Config(e) => write!(f, "{}", e),
            MonitorError::Spawn(e) => write!(f, "failed to start monitoring thread: {}", e),
            MonitorError::SessionLost => write!(f, "monitoring session lost"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Config(e) => Some(e),
            MonitorError::Spawn(e) => Some(e),
            MonitorError::SessionLost => None,
        }
    }
}

impl From<ConfigError> for MonitorError {
    fn from(e: ConfigError) -> Self {
        MonitorError::Config(e)
    }
}

struct Running<S, Q, E> {
    control: Sender<Control>,
    handle: JoinHandle<CaptureScheduler<S, Q, E>>,
}

enum Session<S, Q, E> {
    Stopped(CaptureScheduler<S, Q, E>),
    Running(Running<S, Q, E>),
    /// Components lost to a panicked or unspawnable thread.
    Failed,
}

/// Owns the monitoring session.
///
/// While stopped the scheduler lives here; `start()` moves it onto a loop
/// thread and `stop()` takes it back, so the database connection and the
/// writer survive restarts.
pub struct Monitor<S, Q, E>
where
    S: LoadSampler + 'static,
    Q: ActivitySource + 'static,
    E: EventSink + Clone,
{
    config: MonitorConfig,
    index: SharedCaptureIndex,
    events: E,
    session: Session<S, Q, E>,
}

impl<S, Q, E> Monitor<S, Q, E>
where
    S: LoadSampler + 'static,
    Q: ActivitySource + 'static,
    E: EventSink + Clone,
{
    /// Creates a stopped monitor. Existing captures in the log directory are
    /// loaded into the index.
    pub fn new(config: MonitorConfig, sampler: S, source: Q, events: E) -> Self {
        let index = match CaptureIndex::load_from_dir(config.log_dir()) {
            Ok(index) => index,
            Err(e) => {
                warn!(
                    "Could not list captures in {}: {}",
                    config.log_dir().display(),
                    e
                );
                CaptureIndex::new()
            }
        };
        debug!("Capture index loaded with {} entries", index.len());
        let index = SharedCaptureIndex::new(index);

        let scheduler = CaptureScheduler::new(
            config.clone(),
            sampler,
            source,
            CaptureWriter::new(config.log_dir()),
            index.clone(),
            events.clone(),
        );

        Self {
            config,
            index,
            events,
            session: Session::Stopped(scheduler),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.session, Session::Running(_))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Shared view of the recent captures.
    pub fn index(&self) -> SharedCaptureIndex {
        self.index.clone()
    }

    /// Starts a session in the Normal state. A no-op reporting
    /// [`MonitorEvent::AlreadyRunning`] when a session is active.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        let mut scheduler = match std::mem::replace(&mut self.session, Session::Failed) {
            Session::Stopped(scheduler) => scheduler,
            Session::Running(running) => {
                self.session = Session::Running(running);
                info!("Start requested while monitoring is running");
                self.events.emit(MonitorEvent::AlreadyRunning);
                return Ok(());
            }
            Session::Failed => return Err(MonitorError::SessionLost),
        };

        scheduler.set_config(self.config.clone());
        scheduler.reset();

        let (control, control_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("pgloadwatch-monitor".to_string())
            .spawn(move || {
                scheduler.run(&control_rx);
                scheduler
            })
            .map_err(|e| {
                error!("Failed to spawn monitoring thread: {}", e);
                MonitorError::Spawn(e)
            })?;

        info!(
            "Monitoring started (threshold {}, check every {:?}, capture every {:?})",
            self.config.threshold(),
            self.config.check_interval(),
            self.config.capture_interval()
        );
        self.events.emit(MonitorEvent::MonitoringStarted {
            threshold: self.config.threshold(),
            check_interval: self.config.check_interval(),
        });
        self.session = Session::Running(Running { control, handle });
        Ok(())
    }

    /// Stops the session, waiting for an in-flight tick to finish. Any open
    /// episode is dropped without [`MonitorEvent::HighLoadEnded`].
    pub fn stop(&mut self) -> Result<(), MonitorError> {
        let running = match std::mem::replace(&mut self.session, Session::Failed) {
            Session::Running(running) => running,
            other => {
                self.session = other;
                return Ok(());
            }
        };

        // A send error means the loop already exited; join still collects it.
        let _ = running.control.send(Control::Stop);
        match running.handle.join() {
            Ok(scheduler) => {
                self.session = Session::Stopped(scheduler);
                info!("Monitoring stopped");
                self.events.emit(MonitorEvent::MonitoringStopped);
                Ok(())
            }
            Err(_) => {
                error!("Monitoring thread panicked");
                Err(MonitorError::SessionLost)
            }
        }
    }

    /// Changes the load threshold. An invalid value is rejected and the
    /// previous threshold stays; a running session is restarted.
    pub fn set_threshold(&mut self, threshold: f64) -> Result<(), MonitorError> {
        let config = match self.config.with_threshold(threshold) {
            Ok(config) => config,
            Err(e) => {
                warn!("Threshold change rejected: {}", e);
                self.events.emit(MonitorEvent::ConfigurationError {
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let was_running = self.is_running();
        if was_running {
            self.stop()?;
        }
        self.config = config;
        info!("Load threshold set to {}", threshold);
        self.events.emit(MonitorEvent::ThresholdChanged { threshold });
        if was_running {
            self.start()?;
        }
        Ok(())
    }
}

impl<S, Q, E> Drop for Monitor<S, Q, E>
where
    S: LoadSampler + 'static,
    Q: ActivitySource + 'static,
    E: EventSink + Clone,
{
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionParams;
    use crate::monitor::scheduler::tests::{FixedSource, ScriptedSampler};
    use std::time::Duration;
    use tempfile::tempdir;

    type TestMonitor = Monitor<ScriptedSampler, FixedSource, Sender<MonitorEvent>>;

    fn monitor(dir: &std::path::Path, loads: &[f64]) -> (TestMonitor, mpsc::Receiver<MonitorEvent>) {
        let config = MonitorConfig::new(
            1.5,
            Duration::from_secs(1),
            Duration::from_secs(60),
            dir,
            ConnectionParams::default(),
        )
        .unwrap()
        .with_intervals_unchecked(Duration::from_millis(20), Duration::from_secs(60));
        let (tx, rx) = mpsc::channel();
        let monitor = Monitor::new(
            config,
            ScriptedSampler::new(loads),
            FixedSource::queries(&[]),
            tx,
        );
        (monitor, rx)
    }

    fn control_events(rx: &mpsc::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
        rx.try_iter()
            .filter(|e| {
                matches!(
                    e,
                    MonitorEvent::MonitoringStarted { .. }
                        | MonitorEvent::MonitoringStopped
                        | MonitorEvent::AlreadyRunning
                        | MonitorEvent::ThresholdChanged { .. }
                        | MonitorEvent::ConfigurationError { .. }
                )
            })
            .collect()
    }

    #[test]
    fn second_start_reports_already_running() {
        let dir = tempdir().unwrap();
        let (mut m, rx) = monitor(dir.path(), &[0.5]);

        m.start().unwrap();
        m.start().unwrap();
        assert!(m.is_running());
        m.stop().unwrap();
        assert!(!m.is_running());

        let events = control_events(&rx);
        assert!(matches!(events[0], MonitorEvent::MonitoringStarted { .. }));
        assert_eq!(events[1], MonitorEvent::AlreadyRunning);
        assert_eq!(events[2], MonitorEvent::MonitoringStopped);
    }

    #[test]
    fn stop_when_stopped_is_noop() {
        let dir = tempdir().unwrap();
        let (mut m, rx) = monitor(dir.path(), &[0.5]);
        m.stop().unwrap();
        assert!(control_events(&rx).is_empty());
    }

    #[test]
    fn invalid_threshold_keeps_previous() {
        let dir = tempdir().unwrap();
        let (mut m, rx) = monitor(dir.path(), &[0.5]);

        let err = m.set_threshold(0.0).unwrap_err();
        assert!(matches!(err, MonitorError::Config(ConfigError::InvalidThreshold(_))));
        assert_eq!(m.config().threshold(), 1.5);
        assert!(matches!(
            control_events(&rx)[0],
            MonitorEvent::ConfigurationError { .. }
        ));
    }

    #[test]
    fn threshold_change_restarts_running_session() {
        let dir = tempdir().unwrap();
        let (mut m, rx) = monitor(dir.path(), &[0.5]);

        m.start().unwrap();
        m.set_threshold(3.0).unwrap();
        assert!(m.is_running());
        assert_eq!(m.config().threshold(), 3.0);
        m.stop().unwrap();

        let events = control_events(&rx);
        assert_eq!(events.len(), 5);
        assert_eq!(events[1], MonitorEvent::MonitoringStopped);
        assert_eq!(events[2], MonitorEvent::ThresholdChanged { threshold: 3.0 });
        assert_eq!(
            events[3],
            MonitorEvent::MonitoringStarted {
                threshold: 3.0,
                check_interval: Duration::from_millis(20),
            }
        );
    }

    #[test]
    fn drop_stops_loop() {
        let dir = tempdir().unwrap();
        let (mut m, rx) = monitor(dir.path(), &[0.5]);
        m.start().unwrap();
        drop(m);
        let events = control_events(&rx);
        assert_eq!(events.last(), Some(&MonitorEvent::MonitoringStopped));
    }
}
