//! Parser for capture files produced by [`CaptureWriter`](super::CaptureWriter).

use std::path::Path;

use crate::fmt::{from_dash, parse_elapsed, parse_timestamp};
use crate::storage::model::{ActiveQueryRecord, CaptureRecord, LoadSample, ServerInfo};
use crate::storage::writer::SEPARATOR_WIDTH;

const HEADER_PREFIX: &str = "--- Active PostgreSQL queries at ";
const HEADER_SUFFIX: &str = " ---";

/// Error reading a capture file back.
#[derive(Debug)]
pub enum ParseCaptureError {
    Io(std::io::Error),
    /// Content does not follow the capture layout.
    Malformed { line: usize, message: String },
}

impl std::fmt::Display for ParseCaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseCaptureError::Io(e) => write!(f, "I/O error: {}", e),
            ParseCaptureError::Malformed { line, message } => {
                write!(f, "malformed capture at line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for ParseCaptureError {}

impl From<std::io::Error> for ParseCaptureError {
    fn from(e: std::io::Error) -> Self {
        ParseCaptureError::Io(e)
    }
}

/// Reads and parses a capture file. `id` and `storage_path` come from the path.
pub fn read_capture(path: &Path) -> Result<CaptureRecord, ParseCaptureError> {
    let content = std::fs::read_to_string(path)?;
    let mut record = parse_capture(&content)?;
    record.id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    record.storage_path = path.to_path_buf();
    Ok(record)
}

/// Parses capture file content.
///
/// The returned record has an empty `id` and `storage_path`;
/// use [`read_capture`] to fill them from a file path.
pub fn parse_capture(content: &str) -> Result<CaptureRecord, ParseCaptureError> {
    let mut cursor = LineCursor::new(content);

    let created_at = {
        let line = cursor.next_line()?;
        let ts = line
            .strip_prefix(HEADER_PREFIX)
            .and_then(|rest| rest.strip_suffix(HEADER_SUFFIX))
            .ok_or_else(|| cursor.error("missing capture header"))?;
        parse_timestamp(ts).ok_or_else(|| cursor.error("invalid capture time"))?
    };
    cursor.expect_blank()?;

    let server_addr = cursor.field("Server")?;
    let (host, port) = server_addr
        .rsplit_once(':')
        .ok_or_else(|| cursor.error("server must be host:port"))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| cursor.error("invalid server port"))?;
    let database = cursor.field("Database")?.to_string();

    let loads: Vec<f64> = cursor
        .field("Load average")?
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| cursor.error("invalid load average"))?;
    if loads.len() != 3 {
        return Err(cursor.error("expected three load averages"));
    }

    let utilization = cursor.field("CPU")?;
    let (cpu, mem) = utilization
        .split_once("  Memory: ")
        .ok_or_else(|| cursor.error("invalid utilization line"))?;
    let cpu_percent = parse_percent(cpu).ok_or_else(|| cursor.error("invalid CPU percent"))?;
    let mem_percent = parse_percent(mem).ok_or_else(|| cursor.error("invalid memory percent"))?;
    cursor.expect_blank()?;

    let mut queries = Vec::new();
    while let Some(line) = cursor.peek() {
        if line.is_empty() {
            cursor.next_line()?;
            continue;
        }
        let expected = format!("[Query {}]", queries.len() + 1);
        if line != expected {
            return Err(cursor.error(&format!("expected {}", expected)));
        }
        cursor.next_line()?;
        queries.push(parse_query_block(&mut cursor)?);
    }

    Ok(CaptureRecord {
        id: String::new(),
        created_at,
        server: ServerInfo {
            host: host.to_string(),
            port,
            database,
        },
        load_at_capture: LoadSample {
            load1: loads[0],
            load5: loads[1],
            load15: loads[2],
            cpu_percent,
            mem_percent,
            taken_at: created_at,
        },
        queries,
        storage_path: Default::default(),
    })
}

fn parse_query_block(cursor: &mut LineCursor<'_>) -> Result<ActiveQueryRecord, ParseCaptureError> {
    let pid = cursor
        .field("PID")?
        .parse::<i32>()
        .map_err(|_| cursor.error("invalid PID"))?;
    let user = cursor.field("User")?.to_string();
    let database = cursor.field("Database")?.to_string();
    let client_address = from_dash(cursor.field("Client address")?);
    let state = cursor.field("State")?.to_string();
    let started_at =
        parse_timestamp(cursor.field("Start time")?).ok_or_else(|| cursor.error("invalid start time"))?;
    let duration =
        parse_elapsed(cursor.field("Duration")?).ok_or_else(|| cursor.error("invalid duration"))?;
    let (wait_event_type, wait_event) = cursor
        .field("Waiting")?
        .split_once(" / ")
        .ok_or_else(|| cursor.error("invalid wait event pair"))?;
    let wait_event_type = from_dash(wait_event_type);
    let wait_event = from_dash(wait_event);

    let line_count = cursor
        .field("SQL lines")?
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| cursor.error("invalid SQL line count"))?;
    let mut sql_lines = vec![cursor.field("SQL")?];
    for _ in 1..line_count {
        sql_lines.push(cursor.next_line()?);
    }
    if !is_separator(cursor.next_line()?) {
        return Err(cursor.error("expected separator after SQL"));
    }

    Ok(ActiveQueryRecord {
        pid,
        user,
        database,
        client_address,
        state,
        started_at,
        duration,
        wait_event_type,
        wait_event,
        sql_text: sql_lines.join("\n"),
    })
}

fn is_separator(line: &str) -> bool {
    line.len() == SEPARATOR_WIDTH && line.bytes().all(|b| b == b'-')
}

fn parse_percent(s: &str) -> Option<f64> {
    s.trim().strip_suffix('%')?.parse().ok()
}

/// Walks `\n`-terminated lines. A `\r` before the newline is kept, since it
/// may belong to the captured SQL.
struct LineCursor<'a> {
    lines: std::iter::Peekable<std::str::Split<'a, char>>,
    line_no: usize,
}

impl<'a> LineCursor<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            lines: content.split('\n').peekable(),
            line_no: 0,
        }
    }

    fn peek(&mut self) -> Option<&'a str> {
        self.lines.peek().copied()
    }

    fn next_line(&mut self) -> Result<&'a str, ParseCaptureError> {
        self.line_no += 1;
        self.lines
            .next()
            .ok_or_else(|| self.error("unexpected end of file"))
    }

    fn expect_blank(&mut self) -> Result<(), ParseCaptureError> {
        if self.next_line()?.is_empty() {
            Ok(())
        } else {
            Err(self.error("expected blank line"))
        }
    }

    /// Reads a `Label: value` line and returns the value.
    fn field(&mut self, label: &str) -> Result<&'a str, ParseCaptureError> {
        let line = self.next_line()?;
        line.strip_prefix(label)
            .and_then(|rest| rest.strip_prefix(": "))
            .ok_or_else(|| self.error(&format!("expected {}", label)))
    }

    fn error(&self, message: &str) -> ParseCaptureError {
        ParseCaptureError::Malformed {
            line: self.line_no,
            message: message.to_string(),
        }
    }
}
