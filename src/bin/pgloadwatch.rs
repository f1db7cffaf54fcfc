//! pgloadwatch - PostgreSQL load watcher.
//!
//! Polls host load and, while the 1-minute load average stays above the
//! threshold, writes the active PostgreSQL queries to timestamped log files.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgloadwatch::collector::{PostgresActivitySource, RealFs, SystemSampler};
use pgloadwatch::config::{
    ConnectionParams, DEFAULT_CAPTURE_INTERVAL, DEFAULT_CHECK_INTERVAL, DEFAULT_LOG_DIR,
    DEFAULT_THRESHOLD, MonitorConfig, SslMode,
};
use pgloadwatch::monitor::{Monitor, MonitorEvent, Severity};
use pgloadwatch::storage::{CAPTURE_FILE_EXT, CaptureHandle, CaptureIndex, read_capture};

/// PostgreSQL load watcher.
#[derive(Parser)]
#[command(
    name = "pgloadwatch",
    about = "Captures active PostgreSQL queries while host load is high",
    version
)]
struct Args {
    /// 1-minute load average at or above which captures are taken.
    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD, env = "MONITOR_THRESHOLD")]
    threshold: f64,

    /// Seconds between load checks.
    #[arg(long, default_value_t = DEFAULT_CHECK_INTERVAL.as_secs(), env = "MONITOR_CHECK_INTERVAL")]
    check_interval: u64,

    /// Minimum seconds between captures while load stays high.
    #[arg(long, default_value_t = DEFAULT_CAPTURE_INTERVAL.as_secs(), env = "MONITOR_CAPTURE_INTERVAL")]
    capture_interval: u64,

    /// Directory for capture files.
    #[arg(long, default_value = DEFAULT_LOG_DIR, env = "MONITOR_LOG_DIR")]
    log_dir: PathBuf,

    /// PostgreSQL host.
    #[arg(long, default_value = "localhost", env = "PGHOST")]
    host: String,

    /// PostgreSQL port.
    #[arg(long, default_value_t = 5432, env = "PGPORT")]
    port: u16,

    /// PostgreSQL database.
    #[arg(long, default_value = "postgres", env = "PGDATABASE")]
    database: String,

    /// PostgreSQL user.
    #[arg(long, default_value = "postgres", env = "PGUSER")]
    user: String,

    /// PostgreSQL password.
    #[arg(long, default_value = "", env = "PGPASSWORD", hide_env_values = true)]
    password: String,

    /// TLS mode for the PostgreSQL connection.
    #[arg(long, value_enum, default_value_t = SslMode::Disable, env = "PGSSLMODE")]
    sslmode: SslMode,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Test the PostgreSQL connection and exit.
    #[arg(long, conflicts_with_all = ["list", "show"])]
    check: bool,

    /// List the most recent captures and exit.
    #[arg(long, conflicts_with = "show")]
    list: bool,

    /// Print a capture, by id or by position in --list, and exit.
    #[arg(long, value_name = "ID")]
    show: Option<String>,

    /// Print events and listings as JSON lines.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn connection(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            sslmode: self.sslmode,
        }
    }
}

/// Initializes the tracing subscriber on stderr. Events go to stdout, so the
/// default log level stays at WARN.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(
        format!("pgloadwatch={}", level)
            .parse()
            .expect("static log directive"),
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match MonitorConfig::new(
        args.threshold,
        Duration::from_secs(args.check_interval),
        Duration::from_secs(args.capture_interval),
        &args.log_dir,
        args.connection(),
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    debug!("Configuration: {:?}", config);

    if args.check {
        return check(&config);
    }
    if args.list {
        return list(&config, args.json);
    }
    if let Some(id) = &args.show {
        return show(&config, id, args.json);
    }
    watch(config, &args)
}

fn check(config: &MonitorConfig) -> ExitCode {
    let mut source = PostgresActivitySource::new(config.connection().clone());
    match source.check_connection() {
        Ok(version) => {
            let server = config.connection().server_info();
            println!(
                "Connected to {}:{}/{}",
                server.host, server.port, server.database
            );
            println!("{}", version);
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_pg_warning(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn load_index(config: &MonitorConfig) -> CaptureIndex {
    CaptureIndex::load_from_dir(config.log_dir()).unwrap_or_else(|e| {
        warn!(
            "Could not list captures in {}: {}",
            config.log_dir().display(),
            e
        );
        CaptureIndex::new()
    })
}

fn list(config: &MonitorConfig, json: bool) -> ExitCode {
    let index = load_index(config);
    if !json && index.is_empty() {
        println!("No captures in {}", config.log_dir().display());
    }
    for (pos, handle) in index.entries().iter().enumerate() {
        if json {
            match serde_json::to_string(handle) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to serialize {}: {}", handle.id, e),
            }
        } else {
            println!(
                "{:>3}  {}  {}",
                pos + 1,
                handle.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                handle.id
            );
        }
    }
    ExitCode::SUCCESS
}

/// Finds a capture by 1-based list position or by id. Ids older than the
/// index window are looked up directly in the log directory.
fn resolve(config: &MonitorConfig, key: &str) -> Option<PathBuf> {
    let index = load_index(config);
    if let Ok(pos) = key.parse::<usize>() {
        return pos
            .checked_sub(1)
            .and_then(|i| index.get(i))
            .map(|h: &CaptureHandle| h.storage_path.clone());
    }
    if let Some(handle) = index.find(key) {
        return Some(handle.storage_path.clone());
    }
    let path = config
        .log_dir()
        .join(format!("{}.{}", key, CAPTURE_FILE_EXT));
    path.exists().then_some(path)
}

fn show(config: &MonitorConfig, key: &str, json: bool) -> ExitCode {
    let Some(path) = resolve(config, key) else {
        eprintln!("No capture '{}' in {}", key, config.log_dir().display());
        return ExitCode::FAILURE;
    };

    if json {
        let record = match read_capture(&path) {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Error reading {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        };
        match serde_json::to_string_pretty(&record) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        match std::fs::read_to_string(&path) {
            Ok(content) => print!("{}", content),
            Err(e) => {
                eprintln!("Error reading {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn watch(config: MonitorConfig, args: &Args) -> ExitCode {
    let mut source = PostgresActivitySource::new(config.connection().clone());
    match source.check_connection() {
        Ok(version) => info!("PostgreSQL: {}", version),
        Err(e) => {
            warn!("PostgreSQL check failed: {}", e);
            print_pg_warning(&e.to_string());
        }
    }

    let sampler = SystemSampler::new(RealFs::new(), &args.proc_path);
    let (events_tx, events_rx) = mpsc::channel();
    let mut monitor = Monitor::new(config, sampler, source, events_tx);

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    if let Err(e) = monitor.start() {
        error!("Could not start monitoring: {}", e);
        return ExitCode::FAILURE;
    }

    let printer = EventPrinter {
        json: args.json,
        status: args.verbose > 0,
    };
    while running.load(Ordering::SeqCst) {
        match events_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => printer.print(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Shutting down...");
    let result = monitor.stop();
    for event in events_rx.try_iter() {
        printer.print(&event);
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Shutdown failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

struct EventPrinter {
    json: bool,
    /// Print per-tick load samples in text mode.
    status: bool,
}

impl EventPrinter {
    fn print(&self, event: &MonitorEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to serialize event: {}", e),
            }
            return;
        }

        let marker = match event.severity() {
            Severity::Debug if !self.status => return,
            Severity::Debug | Severity::Info => " ",
            Severity::Warning => "!",
            Severity::Error => "E",
        };
        println!("{} {} {}", Local::now().format("%H:%M:%S"), marker, event);
    }
}

/// Prints a colored PostgreSQL warning with configuration hints.
fn print_pg_warning(error: &str) {
    // ANSI colors: red for error, yellow for hints, reset after
    const RED: &str = "\x1b[1;31m";
    const YELLOW: &str = "\x1b[33m";
    const RESET: &str = "\x1b[0m";

    eprintln!("{RED}{error}{RESET}");
    eprintln!();
    eprintln!("{YELLOW}  Configure connection with options or environment variables:");
    eprintln!("    export PGHOST=localhost");
    eprintln!("    export PGPORT=5432");
    eprintln!("    export PGUSER=postgres");
    eprintln!("    export PGPASSWORD=secret");
    eprintln!("    export PGDATABASE=postgres");
    eprintln!("    export PGSSLMODE=disable");
    eprintln!();
    eprintln!("  Captures will report errors until the server is reachable.{RESET}");
}
