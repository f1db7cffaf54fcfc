//! pg_stat_activity snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use postgres::Row;

use crate::storage::model::{ActiveQueryRecord, sort_by_duration_desc};

use super::queries::build_active_queries_query;
use super::{ActivitySource, PostgresActivitySource, SourceError};

impl ActivitySource for PostgresActivitySource {
    /// Collects non-idle sessions.
    ///
    /// On error, stores the message in `last_error`, drops the connection so
    /// the next call reconnects, and returns [`SourceError::SourceUnavailable`].
    fn fetch_active(&mut self) -> Result<Vec<ActiveQueryRecord>, SourceError> {
        self.ensure_connected()?;

        let query = build_active_queries_query(self.server_version_num);
        let result = match self.client.as_mut() {
            Some(client) => client.query(&query, &[]),
            None => {
                return Err(SourceError::SourceUnavailable(
                    "not connected".to_string(),
                ));
            }
        };

        let rows = result.map_err(|e| self.fail(&e))?;
        let mut records = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.fail(&e))?;

        // Stable: server order is kept for equal durations.
        sort_by_duration_desc(&mut records);
        self.last_error = None;
        Ok(records)
    }
}

fn row_to_record(row: &Row) -> Result<ActiveQueryRecord, postgres::Error> {
    let query_start_us: i64 = row.try_get("query_start_us")?;
    let duration_us: i64 = row.try_get("duration_us")?;

    Ok(ActiveQueryRecord {
        pid: row.try_get("pid")?,
        user: row.try_get("usename")?,
        database: row.try_get("datname")?,
        client_address: row.try_get("client_addr")?,
        state: row.try_get("state")?,
        started_at: micros_to_datetime(query_start_us),
        duration: Duration::from_micros(duration_us.max(0) as u64),
        wait_event_type: row.try_get("wait_event_type")?,
        wait_event: row.try_get("wait_event")?,
        sql_text: row.try_get("query")?,
    })
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}
