//! Dual-sink logging owned by one orchestrator instance.
//!
//! # Sinks
//!
//! - **Console**: `INFO` and above, message only, written to stdout for
//!   interactive observation.
//! - **File**: `DEBUG` and above, timestamped and level-tagged, written to
//!   `logs/orchestrator_<YYYYMMDD-HHMMSS>.log` through a non-blocking writer.
//!
//! The sinks are composed into a [`Dispatch`] that is never installed as the
//! global default. The orchestrator attaches it to each step it drives, so
//! collaborators log into the right file even when several orchestrators
//! live in one process.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, format::Writer, time::FormatTime};
use tracing_subscriber::layer::SubscriberExt;

use crate::errors::OrchestratorError;

const LOG_PREFIX: &str = "orchestrator_";
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Which sinks to attach besides the mandatory file sink.
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    /// Emit `INFO`+ lines to stdout
    pub console: bool,
    /// Lower the console threshold to `DEBUG`
    pub verbose: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            console: true,
            verbose: false,
        }
    }
}

/// Timestamp format for the file sink.
struct LogTimestamp;

impl FormatTime for LogTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// The logging context of one orchestrator.
///
/// Dropping it flushes and closes the file sink.
pub struct LogContext {
    dispatch: Dispatch,
    log_file: PathBuf,
    _guard: WorkerGuard,
}

impl LogContext {
    /// Create the log directory and open a fresh log file named after `started_at`.
    ///
    /// Failing to open the file is fatal: a run without durable logs is refused.
    pub fn init(
        log_dir: &Path,
        started_at: DateTime<Local>,
        options: LogOptions,
    ) -> Result<Self, OrchestratorError> {
        std::fs::create_dir_all(log_dir).map_err(|source| OrchestratorError::LogInit {
            path: log_dir.to_path_buf(),
            source,
        })?;

        let stamp = started_at.format("%Y%m%d-%H%M%S").to_string();
        let (file, log_file) =
            open_unique(log_dir, &stamp).map_err(|source| OrchestratorError::LogInit {
                path: log_dir.join(format!("{LOG_PREFIX}{stamp}.log")),
                source,
            })?;

        let (writer, guard) = tracing_appender::non_blocking(file);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_timer(LogTimestamp)
            .with_filter(LevelFilter::DEBUG);

        let console_level = if options.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let console_layer = options.console.then(|| {
            fmt::layer()
                .with_writer(io::stdout)
                .without_time()
                .with_level(false)
                .with_target(false)
                .with_filter(console_level)
        });

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            log_file,
            _guard: guard,
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Run a synchronous closure with this context as the active subscriber.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl std::fmt::Debug for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogContext")
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}

/// Open `orchestrator_<stamp>.log`, or `orchestrator_<stamp>-N.log` if taken.
fn open_unique(log_dir: &Path, stamp: &str) -> io::Result<(File, PathBuf)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{LOG_PREFIX}{stamp}.log")
        } else {
            format!("{LOG_PREFIX}{stamp}-{attempt}.log")
        };
        let path = log_dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free log file name for timestamp {stamp}"),
    ))
}

/// Most recently modified orchestrator log in `log_dir`.
pub fn latest_log_file(log_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(log_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"))
                .unwrap_or(false)
        })
        .max_by_key(|p| p.metadata().and_then(|m| m.modified()).ok())
}

/// Read a log file as lines. A missing file yields no lines.
pub fn read_log_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
