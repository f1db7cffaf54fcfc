//! Per-tick state machine and poll loop.
//!
//! Each tick samples the host, feeds the detector and, while an episode is
//! open, captures active queries at most once per capture interval. The first
//! capture of an episode fires on the tick that opened it.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::collector::{ActivitySource, LoadSampler, SampleError, SourceError};
use crate::config::MonitorConfig;
use crate::storage::{CaptureHandle, CaptureRecord, CaptureWriter, LoadSample, SharedCaptureIndex};

use super::detector::{LoadThresholdDetector, Transition};
use super::event::{EventSink, MonitorEvent};

/// Requests accepted by a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadLevel {
    Normal,
    High,
}

/// Finer view of [`LoadLevel::High`]: whether the episode has had its
/// first capture attempt yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Normal,
    HighPendingCapture,
    HighCaptured,
}

/// Episode bookkeeping owned by the scheduler.
///
/// The level is derived from `episode_started_at`, so it is High exactly while
/// an episode start is recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadState {
    episode_started_at: Option<DateTime<Utc>>,
    last_capture_at: Option<DateTime<Utc>>,
}

impl LoadState {
    pub fn level(&self) -> LoadLevel {
        if self.episode_started_at.is_some() {
            LoadLevel::High
        } else {
            LoadLevel::Normal
        }
    }

    pub fn phase(&self) -> LoadPhase {
        match (self.episode_started_at, self.last_capture_at) {
            (None, _) => LoadPhase::Normal,
            (Some(_), None) => LoadPhase::HighPendingCapture,
            (Some(_), Some(_)) => LoadPhase::HighCaptured,
        }
    }

    pub fn episode_started_at(&self) -> Option<DateTime<Utc>> {
        self.episode_started_at
    }

    pub fn last_capture_at(&self) -> Option<DateTime<Utc>> {
        self.last_capture_at
    }

    fn capture_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        if self.episode_started_at.is_none() {
            return false;
        }
        match self.last_capture_at {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                // A clock stepped back behind the last capture counts as due.
                elapsed < TimeDelta::zero()
                    || TimeDelta::from_std(interval).is_ok_and(|interval| elapsed >= interval)
            }
        }
    }
}

/// Result of one capture attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Saved(CaptureHandle),
    Empty,
    SourceFailed(String),
    WriteFailed(String),
}

/// What a single tick did. Returned for callers driving ticks by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// `None` when host metrics could not be read.
    pub sample: Option<LoadSample>,
    pub transition: Transition,
    pub capture: Option<CaptureOutcome>,
}

/// Owns everything a monitoring session mutates.
pub struct CaptureScheduler<S, Q, E> {
    config: MonitorConfig,
    sampler: S,
    source: Q,
    writer: CaptureWriter,
    index: SharedCaptureIndex,
    events: E,
    detector: LoadThresholdDetector,
    state: LoadState,
}

impl<S, Q, E> CaptureScheduler<S, Q, E>
where
    S: LoadSampler,
    Q: ActivitySource,
    E: EventSink,
{
    pub fn new(
        config: MonitorConfig,
        sampler: S,
        source: Q,
        writer: CaptureWriter,
        index: SharedCaptureIndex,
        events: E,
    ) -> Self {
        Self {
            config,
            sampler,
            source,
            writer,
            index,
            events,
            detector: LoadThresholdDetector::new(),
            state: LoadState::default(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Replaces the configuration for the next session.
    pub(crate) fn set_config(&mut self, config: MonitorConfig) {
        self.config = config;
    }

    /// Drops any open episode without reporting its end.
    pub fn reset(&mut self) {
        if self.state.level() == LoadLevel::High {
            debug!("Discarding open high-load episode");
        }
        self.state = LoadState::default();
        self.detector.reset();
    }

    /// Runs one poll step at `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let sample = match self.sampler.sample() {
            Ok(sample) => sample,
            Err(SampleError::MetricsUnavailable(message)) => {
                warn!("Skipping tick, host metrics unavailable: {}", message);
                self.events.emit(MonitorEvent::MetricsUnavailable { message });
                return TickReport {
                    sample: None,
                    transition: Transition::None,
                    capture: None,
                };
            }
        };

        let threshold = self.config.threshold();
        let transition = self.detector.evaluate(&sample, threshold);
        debug!(
            "load1={:.2} cpu={:.1}% mem={:.1}% phase={:?}",
            sample.load1,
            sample.cpu_percent,
            sample.mem_percent,
            self.state.phase()
        );
        self.events.emit(MonitorEvent::LoadSampled { sample });

        match transition {
            Transition::EnteredHigh => {
                warn!(
                    "High load detected: {:.2} (threshold: {})",
                    sample.load1, threshold
                );
                self.state.episode_started_at = Some(now);
                self.state.last_capture_at = None;
                self.events
                    .emit(MonitorEvent::HighLoadDetected { sample, threshold });
            }
            Transition::ExitedHigh => {
                let duration = self
                    .state
                    .episode_started_at
                    .take()
                    .and_then(|started| (now - started).to_std().ok())
                    .unwrap_or(Duration::ZERO);
                self.state.last_capture_at = None;
                info!("Load back to normal after {:?}", duration);
                self.events.emit(MonitorEvent::HighLoadEnded { duration });
            }
            Transition::None => {}
        }

        let capture = if self
            .state
            .capture_due(now, self.config.capture_interval())
        {
            Some(self.capture(now, sample))
        } else {
            None
        };

        TickReport {
            sample: Some(sample),
            transition,
            capture,
        }
    }

    fn capture(&mut self, now: DateTime<Utc>, sample: LoadSample) -> CaptureOutcome {
        let outcome = match self.source.fetch_active() {
            Ok(queries) if queries.is_empty() => {
                info!("No active queries found in PostgreSQL");
                self.events.emit(MonitorEvent::NoActiveQueries);
                CaptureOutcome::Empty
            }
            Ok(queries) => {
                let count = queries.len();
                let draft = CaptureRecord::draft(
                    now,
                    self.config.connection().server_info(),
                    sample,
                    queries,
                );
                match self.writer.write(&draft) {
                    Ok(handle) => {
                        info!(
                            "Saved {} active queries to {}",
                            count,
                            handle.storage_path.display()
                        );
                        self.index.register(handle.clone());
                        self.events.emit(MonitorEvent::CaptureSaved {
                            handle: handle.clone(),
                            queries: count,
                        });
                        CaptureOutcome::Saved(handle)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        error!("Capture not saved: {}", message);
                        self.events.emit(MonitorEvent::CaptureWriteError {
                            message: message.clone(),
                        });
                        CaptureOutcome::WriteFailed(message)
                    }
                }
            }
            Err(SourceError::SourceUnavailable(message)) => {
                error!("Could not read active queries: {}", message);
                self.events.emit(MonitorEvent::CaptureSourceError {
                    message: message.clone(),
                });
                CaptureOutcome::SourceFailed(message)
            }
        };

        self.state.last_capture_at = Some(now);
        outcome
    }

    /// Ticks every `check_interval` until [`Control::Stop`] arrives or the
    /// control channel is closed.
    pub(crate) fn run(&mut self, control: &Receiver<Control>) {
        let period = self.config.check_interval();
        info!("Monitoring loop started, period {:?}", period);

        loop {
            let started = Instant::now();
            self.tick(Utc::now());

            let wait = period.saturating_sub(started.elapsed());
            match control.recv_timeout(wait) {
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        info!("Monitoring loop stopped");
    }
}
