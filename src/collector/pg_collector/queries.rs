//! SQL for the active-session snapshot.

/// Builds the version-aware query for non-idle sessions in `pg_stat_activity`.
///
/// Excludes the monitoring connection itself and orders by elapsed time,
/// longest first. Timestamps and durations are returned as microseconds.
/// Servers older than 9.6 have no `wait_event*` columns; their boolean
/// `waiting` flag is reported as a `Lock` wait. An unknown version is
/// treated as modern.
pub(super) fn build_active_queries_query(server_version_num: Option<i32>) -> String {
    let (wait_event_type_expr, wait_event_expr) = if server_version_num.is_none_or(|v| v >= 90600) {
        ("wait_event_type", "wait_event")
    } else {
        ("CASE WHEN waiting THEN 'Lock' END", "NULL")
    };

    format!(
        r#"
            SELECT
                pid,
                COALESCE(usename, '') as usename,
                COALESCE(datname, '') as datname,
                client_addr::text as client_addr,
                COALESCE(state, '') as state,
                (EXTRACT(EPOCH FROM COALESCE(query_start, backend_start, now())) * 1000000)::bigint
                    as query_start_us,
                GREATEST(
                    (EXTRACT(EPOCH FROM now() - COALESCE(query_start, backend_start, now())) * 1000000)::bigint,
                    0
                ) as duration_us,
                {wait_event_type_expr}::text as wait_event_type,
                {wait_event_expr}::text as wait_event,
                COALESCE(query, '') as query
            FROM pg_stat_activity
            WHERE state <> 'idle'
              AND pid <> pg_backend_pid()
            ORDER BY duration_us DESC
        "#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_query_excludes_idle_and_own_backend() {
        let q = build_active_queries_query(Some(160000));
        assert!(q.contains("WHERE state <> 'idle'"));
        assert!(q.contains("AND pid <> pg_backend_pid()"));
        assert!(q.contains("ORDER BY duration_us DESC"));
    }

    #[test]
    fn active_query_uses_wait_event_columns_on_pg96_plus() {
        let q = build_active_queries_query(Some(90600));
        assert!(q.contains("wait_event_type::text as wait_event_type"));
        assert!(q.contains("wait_event::text as wait_event"));
        assert!(!q.contains("waiting"));
    }

    #[test]
    fn active_query_maps_waiting_flag_on_old_servers() {
        let q = build_active_queries_query(Some(90500));
        assert!(q.contains("CASE WHEN waiting THEN 'Lock' END"));
        assert!(q.contains("NULL::text as wait_event"));
    }

    #[test]
    fn unknown_version_uses_modern_columns() {
        let q = build_active_queries_query(None);
        assert!(q.contains("wait_event_type::text as wait_event_type"));
    }
}
