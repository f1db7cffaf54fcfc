//! Threshold detection, capture scheduling and session control.

mod control;
mod detector;
mod event;
mod scheduler;

pub use control::{Monitor, MonitorError};
pub use detector::{LoadThresholdDetector, Transition};
pub use event::{EventSink, MonitorEvent, Severity};
pub use scheduler::{CaptureOutcome, CaptureScheduler, LoadLevel, LoadPhase, LoadState, TickReport};
