//! Host metrics from the Linux `/proc` filesystem.

pub mod parser;
mod sampler;

pub use sampler::{DEFAULT_CPU_WINDOW, LoadSampler, SampleError, SystemSampler};
