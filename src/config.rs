//! Run parameters, built once at startup and handed to each component.

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::ServerInfo;

/// Default 1-minute load average that starts an episode.
pub const DEFAULT_THRESHOLD: f64 = 2.0;
/// Default time between load checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
/// Default minimum time between captures within an episode.
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(60);
/// Default capture directory, relative to the working directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Error type for rejected configuration values.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Threshold must be a finite number greater than zero.
    InvalidThreshold(f64),
    /// Intervals must be at least one second.
    InvalidInterval { name: &'static str, value: Duration },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidThreshold(v) => {
                write!(f, "threshold must be greater than zero (got {})", v)
            }
            ConfigError::InvalidInterval { name, value } => {
                write!(f, "{} must be at least 1s (got {:?})", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Checks a load threshold.
pub fn validate_threshold(threshold: f64) -> Result<f64, ConfigError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(threshold)
    } else {
        Err(ConfigError::InvalidThreshold(threshold))
    }
}

fn validate_interval(name: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value >= Duration::from_secs(1) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidInterval { name, value })
    }
}

/// TLS policy for the database connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// TLS when the server supports it.
    Prefer,
    /// Fail unless TLS is negotiated.
    Require,
}

/// Database connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub sslmode: SslMode,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            sslmode: SslMode::Disable,
        }
    }
}

impl ConnectionParams {
    /// Target description written into every capture header.
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
        }
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("sslmode", &self.sslmode)
            .finish()
    }
}

/// Immutable monitoring configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    threshold: f64,
    check_interval: Duration,
    capture_interval: Duration,
    log_dir: PathBuf,
    connection: ConnectionParams,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            check_interval: DEFAULT_CHECK_INTERVAL,
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            connection: ConnectionParams::default(),
        }
    }
}

impl MonitorConfig {
    /// Builds a validated configuration.
    pub fn new(
        threshold: f64,
        check_interval: Duration,
        capture_interval: Duration,
        log_dir: impl Into<PathBuf>,
        connection: ConnectionParams,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            threshold: validate_threshold(threshold)?,
            check_interval: validate_interval("check interval", check_interval)?,
            capture_interval: validate_interval("capture interval", capture_interval)?,
            log_dir: log_dir.into(),
            connection,
        })
    }

    /// Copy with a different threshold; `self` is untouched on error.
    pub fn with_threshold(&self, threshold: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            threshold: validate_threshold(threshold)?,
            ..self.clone()
        })
    }

    /// Copy with different check/capture intervals, unvalidated.
    ///
    /// Sub-second intervals are only meaningful for driving the loop in tests.
    #[doc(hidden)]
    pub fn with_intervals_unchecked(&self, check: Duration, capture: Duration) -> Self {
        Self {
            check_interval: check,
            capture_interval: capture,
            ..self.clone()
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn capture_interval(&self) -> Duration {
        self.capture_interval
    }

    pub fn log_dir(&self) -> &std::path::Path {
        &self.log_dir
    }

    pub fn connection(&self) -> &ConnectionParams {
        &self.connection
    }
}
