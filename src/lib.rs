//! pgloadwatch - watches host load and snapshots active PostgreSQL queries
//! while the load stays above a threshold.
//!
//! This library provides the pieces used by the `pgloadwatch` binary:
//! - `collector` - host load sampling and the `pg_stat_activity` source
//! - `monitor` - threshold detection, capture scheduling, start/stop control
//! - `storage` - capture files and the recent-captures index

pub mod collector;
pub mod config;
pub mod fmt;
pub mod monitor;
pub mod storage;
