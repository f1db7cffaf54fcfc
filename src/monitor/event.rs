//! Notifications pushed from the monitor to the presentation layer.

use std::sync::mpsc::Sender;
use std::time::Duration;

use serde::Serialize;

use crate::fmt::format_duration;
use crate::storage::{CaptureHandle, LoadSample};

/// Everything the monitor reports. Delivered one-way through an [`EventSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    MonitoringStarted {
        threshold: f64,
        check_interval: Duration,
    },
    MonitoringStopped,
    /// `start()` was requested while a session is already running.
    AlreadyRunning,
    ThresholdChanged {
        threshold: f64,
    },
    /// A requested configuration change was rejected; the prior value is kept.
    ConfigurationError {
        message: String,
    },
    /// Fresh host sample, emitted every successful tick.
    LoadSampled {
        sample: LoadSample,
    },
    HighLoadDetected {
        sample: LoadSample,
        threshold: f64,
    },
    HighLoadEnded {
        duration: Duration,
    },
    CaptureSaved {
        handle: CaptureHandle,
        queries: usize,
    },
    NoActiveQueries,
    CaptureSourceError {
        message: String,
    },
    CaptureWriteError {
        message: String,
    },
    MetricsUnavailable {
        message: String,
    },
}

/// How the presentation layer should surface an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl MonitorEvent {
    pub fn severity(&self) -> Severity {
        match self {
            MonitorEvent::LoadSampled { .. } => Severity::Debug,
            MonitorEvent::MonitoringStarted { .. }
            | MonitorEvent::MonitoringStopped
            | MonitorEvent::ThresholdChanged { .. }
            | MonitorEvent::HighLoadEnded { .. }
            | MonitorEvent::CaptureSaved { .. }
            | MonitorEvent::NoActiveQueries => Severity::Info,
            MonitorEvent::AlreadyRunning | MonitorEvent::HighLoadDetected { .. } => {
                Severity::Warning
            }
            MonitorEvent::ConfigurationError { .. }
            | MonitorEvent::CaptureSourceError { .. }
            | MonitorEvent::CaptureWriteError { .. }
            | MonitorEvent::MetricsUnavailable { .. } => Severity::Error,
        }
    }
}

impl std::fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorEvent::MonitoringStarted {
                threshold,
                check_interval,
            } => write!(
                f,
                "Monitoring started (threshold {}), checking load every {}",
                threshold,
                format_duration(*check_interval)
            ),
            MonitorEvent::MonitoringStopped => write!(f, "Monitoring stopped"),
            MonitorEvent::AlreadyRunning => write!(f, "Monitoring is already running"),
            MonitorEvent::ThresholdChanged { threshold } => {
                write!(f, "Load threshold set to {}", threshold)
            }
            MonitorEvent::ConfigurationError { message } => {
                write!(f, "Configuration rejected: {}", message)
            }
            MonitorEvent::LoadSampled { sample } => write!(
                f,
                "Load {:.2} {:.2} {:.2}, CPU {:.1}%, memory {:.1}%",
                sample.load1, sample.load5, sample.load15, sample.cpu_percent, sample.mem_percent
            ),
            MonitorEvent::HighLoadDetected { sample, threshold } => write!(
                f,
                "High load detected: {:.2} (threshold: {})",
                sample.load1, threshold
            ),
            MonitorEvent::HighLoadEnded { duration } => {
                write!(f, "Load back to normal after {}", format_duration(*duration))
            }
            MonitorEvent::CaptureSaved { handle, queries } => write!(
                f,
                "Saved {} active queries to {}",
                queries,
                handle.storage_path.display()
            ),
            MonitorEvent::NoActiveQueries => write!(f, "No active queries found in PostgreSQL"),
            MonitorEvent::CaptureSourceError { message } => {
                write!(f, "Could not read active queries: {}", message)
            }
            MonitorEvent::CaptureWriteError { message } => {
                write!(f, "Could not save capture: {}", message)
            }
            MonitorEvent::MetricsUnavailable { message } => {
                write!(f, "Host metrics unavailable: {}", message)
            }
        }
    }
}

/// Receiver of monitor events.
pub trait EventSink: Send + 'static {
    fn emit(&mut self, event: MonitorEvent);
}

impl EventSink for Sender<MonitorEvent> {
    fn emit(&mut self, event: MonitorEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.send(event);
    }
}

impl<F> EventSink for F
where
    F: FnMut(MonitorEvent) + Send + 'static,
{
    fn emit(&mut self, event: MonitorEvent) {
        self(event)
    }
}
