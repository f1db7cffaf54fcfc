//! Edge detection on the 1-minute load average.

use crate::storage::LoadSample;

/// Change of the Normal/High condition caused by one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    EnteredHigh,
    ExitedHigh,
}

/// Tracks whether load is above the threshold and reports only changes.
#[derive(Debug, Default)]
pub struct LoadThresholdDetector {
    high: bool,
}

impl LoadThresholdDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// High when `load1 >= threshold`.
    pub fn evaluate(&mut self, sample: &LoadSample, threshold: f64) -> Transition {
        let high = sample.load1 >= threshold;
        let transition = match (self.high, high) {
            (false, true) => Transition::EnteredHigh,
            (true, false) => Transition::ExitedHigh,
            _ => Transition::None,
        };
        self.high = high;
        transition
    }

    pub fn is_high(&self) -> bool {
        self.high
    }

    pub fn reset(&mut self) {
        self.high = false;
    }
}
