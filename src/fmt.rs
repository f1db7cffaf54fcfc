//! Shared formatting helpers for capture files, events and log lines.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Timestamp layout used inside capture files, always UTC.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_SUFFIX: &str = " UTC";

/// Format duration in whole seconds as human-readable: `"45s"`, `"3m 5s"`,
/// `"2h 10m"`, `"1d 4h"`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Format a query's elapsed time as `H:MM:SS.ffffff`.
///
/// Hours are not wrapped into days, so the value parses back unambiguously
/// with [`parse_elapsed`].
pub fn format_elapsed(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_micros()
    )
}

/// Parses the output of [`format_elapsed`].
pub fn parse_elapsed(s: &str) -> Option<Duration> {
    let mut parts = s.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let (secs, micros) = parts.next()?.split_once('.')?;
    let secs: u64 = secs.parse().ok()?;
    if minutes >= 60 || secs >= 60 || micros.len() != 6 {
        return None;
    }
    let micros: u32 = micros.parse().ok()?;

    Some(
        Duration::from_secs(hours * 3600 + minutes * 60 + secs)
            + Duration::from_micros(micros.into()),
    )
}

/// Format a timestamp as `2026-10-14 09:58:30.000000 UTC`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    format!("{}{}", ts.format(TIMESTAMP_FORMAT), TIMESTAMP_SUFFIX)
}

/// Parses the output of [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim().strip_suffix(TIMESTAMP_SUFFIX)?;
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Renders an optional text field, `-` when absent.
pub fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

/// Inverse of [`or_dash`].
pub fn from_dash(value: &str) -> Option<String> {
    match value.trim() {
        "-" | "" => None,
        v => Some(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_ranges() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m 5s");
        assert_eq!(format_duration(Duration::from_secs(7800)), "2h 10m");
        assert_eq!(format_duration(Duration::from_secs(100_800)), "1d 4h");
    }

    #[test]
    fn format_elapsed_keeps_hours_beyond_a_day() {
        let d = Duration::from_secs(26 * 3600 + 61) + Duration::from_micros(42);
        assert_eq!(format_elapsed(d), "26:01:01.000042");
        assert_eq!(parse_elapsed("26:01:01.000042"), Some(d));
    }

    #[test]
    fn parse_elapsed_rejects_malformed_values() {
        assert_eq!(parse_elapsed("1:99:00.000000"), None);
        assert_eq!(parse_elapsed("0:00:01"), None);
        assert_eq!(parse_elapsed("0:00:01.5"), None);
        assert_eq!(parse_elapsed("abc"), None);
    }

    #[test]
    fn timestamp_keeps_microseconds() {
        let ts = DateTime::from_timestamp(1_760_000_000, 123_456_000).unwrap();
        let s = format_timestamp(ts);
        assert!(s.ends_with(".123456 UTC"));
        assert_eq!(parse_timestamp(&s), Some(ts));
    }

    #[test]
    fn dash_placeholders() {
        assert_eq!(or_dash(None), "-");
        assert_eq!(or_dash(Some("Lock")), "Lock");
        assert_eq!(from_dash("-"), None);
        assert_eq!(from_dash("Lock"), Some("Lock".to_string()));
    }
}
