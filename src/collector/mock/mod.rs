//! Mock filesystem and fixtures for testing the sampler without a Linux
//! `/proc` filesystem.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
