//! PostgreSQL active-session source.
//!
//! Reads non-idle backends from `pg_stat_activity`. A single connection is
//! opened on first use and reused; any connection or query error drops it so
//! the next call reconnects.

mod activity;
mod queries;

use std::time::Duration;

use postgres::config::SslMode as PgSslMode;
use postgres::{Client, Config, NoTls};
use postgres_native_tls::MakeTlsConnector;
use tracing::{debug, info};

use crate::config::{ConnectionParams, SslMode};
use crate::storage::model::ActiveQueryRecord;

/// Upper bound for establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const APPLICATION_NAME: &str = "pgloadwatch";

/// Error type for the activity source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Server unreachable, authentication rejected, or query failed.
    SourceUnavailable(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::SourceUnavailable(msg) => write!(f, "PostgreSQL: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Snapshot source of currently active queries.
pub trait ActivitySource: Send {
    /// Returns active sessions, longest-running first.
    fn fetch_active(&mut self) -> Result<Vec<ActiveQueryRecord>, SourceError>;
}

/// Reads active sessions from a PostgreSQL server.
pub struct PostgresActivitySource {
    params: ConnectionParams,
    pub(crate) client: Option<Client>,
    pub(crate) server_version_num: Option<i32>,
    pub(crate) last_error: Option<String>,
}

impl PostgresActivitySource {
    /// Creates a source. No connection is made until first use.
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            client: None,
            server_version_num: None,
            last_error: None,
        }
    }

    /// Returns the last error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Connects (or reuses the connection) and returns the server version
    /// string from `SELECT version()`.
    pub fn check_connection(&mut self) -> Result<String, SourceError> {
        self.ensure_connected()?;
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| SourceError::SourceUnavailable("not connected".to_string()))?;

        match client.query_one("SELECT version()", &[]) {
            Ok(row) => row.try_get::<_, String>(0).map_err(|e| self.fail(&e)),
            Err(e) => Err(self.fail(&e)),
        }
    }

    /// Ensures connection is established, reconnecting if needed.
    pub(crate) fn ensure_connected(&mut self) -> Result<(), SourceError> {
        if self.client.as_ref().is_some_and(|c| !c.is_closed()) {
            return Ok(());
        }
        if self.client.take().is_some() {
            debug!("PostgreSQL connection closed, reconnecting");
        }

        match connect(&self.params) {
            Ok(mut client) => {
                // Determine server version once per (re)connect.
                self.server_version_num = client
                    .query_one("SHOW server_version_num", &[])
                    .ok()
                    .and_then(|row| row.try_get::<_, String>(0).ok())
                    .and_then(|v| v.parse::<i32>().ok());

                info!(
                    "Connected to PostgreSQL {}:{}/{} (server_version_num={:?})",
                    self.params.host, self.params.port, self.params.database, self.server_version_num
                );
                self.client = Some(client);
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                let SourceError::SourceUnavailable(msg) = &e;
                self.last_error = Some(msg.clone());
                self.server_version_num = None;
                Err(e)
            }
        }
    }

    /// Records a failure and drops the connection so the next call reconnects.
    fn fail(&mut self, e: &postgres::Error) -> SourceError {
        let msg = format_postgres_error(e);
        self.last_error = Some(msg.clone());
        self.client = None;
        self.server_version_num = None;
        SourceError::SourceUnavailable(msg)
    }
}

fn connect(params: &ConnectionParams) -> Result<Client, SourceError> {
    let mut config = Config::new();
    config
        .host(&params.host)
        .port(params.port)
        .user(&params.user)
        .dbname(&params.database)
        .application_name(APPLICATION_NAME)
        .connect_timeout(CONNECT_TIMEOUT);
    if !params.password.is_empty() {
        config.password(&params.password);
    }

    let result = match params.sslmode {
        SslMode::Disable => {
            config.ssl_mode(PgSslMode::Disable);
            config.connect(NoTls)
        }
        SslMode::Prefer | SslMode::Require => {
            config.ssl_mode(if params.sslmode == SslMode::Require {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            });
            let connector = native_tls::TlsConnector::new().map_err(|e| {
                SourceError::SourceUnavailable(format!("TLS setup failed: {}", e))
            })?;
            config.connect(MakeTlsConnector::new(connector))
        }
    };

    result.map_err(|e| SourceError::SourceUnavailable(format_postgres_error(&e)))
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_params() -> ConnectionParams {
        ConnectionParams {
            host: "127.0.0.1".to_string(),
            // Reserved port, nothing listens here.
            port: 1,
            ..ConnectionParams::default()
        }
    }

    #[test]
    fn new_does_not_connect() {
        let source = PostgresActivitySource::new(unreachable_params());
        assert!(source.client.is_none());
        assert!(source.last_error().is_none());
    }

    #[test]
    fn unreachable_server_is_source_unavailable() {
        let mut source = PostgresActivitySource::new(unreachable_params());
        let err = source.fetch_active().unwrap_err();
        assert!(matches!(err, SourceError::SourceUnavailable(_)));
        assert!(source.last_error().is_some());
        assert!(source.client.is_none());
    }

    #[test]
    fn failed_connect_is_retried_on_next_call() {
        let mut source = PostgresActivitySource::new(unreachable_params());
        assert!(source.check_connection().is_err());
        assert!(source.check_connection().is_err());
        assert!(source.client.is_none());
    }

    #[test]
    fn source_error_display() {
        let err = SourceError::SourceUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "PostgreSQL: connection refused");
    }
}
