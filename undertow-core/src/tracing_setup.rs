//! Tracing setup for Undertow
//!
//! The console shows events at the level picked on the command line. A file
//! layer records everything at TRACE, including when `peer` and `announcer`
//! spans close, so a stalled swarm can be reconstructed after the fact.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Log file written by every run, replaced on the next one.
pub const LOG_FILE_NAME: &str = "undertow-last-run.log";

/// HTTP internals are only interesting when something is already wrong.
const QUIET_DIRECTIVES: [&str; 2] = ["hyper=warn", "reqwest=warn"];

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("A global subscriber is already installed")]
    AlreadyInstalled,
}

/// Installs the console and file layers.
///
/// `RUST_LOG` overrides `console_level` for the console layer only. The file
/// goes to `logs_dir/undertow-last-run.log`, with `logs_dir` defaulting to
/// `./logs`.
///
/// # Errors
///
/// - `TracingError::LogFile` - If the directory or file cannot be created
/// - `TracingError::AlreadyInstalled` - If called twice in one process
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<PathBuf, TracingError> {
    let log_path = logs_dir.unwrap_or_else(|| Path::new("logs")).join(LOG_FILE_NAME);
    let log_file = open_log_file(&log_path)?;

    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => quiet_filter(console_level)?,
    };
    let console_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(log_file)
        .with_filter(quiet_filter(Level::TRACE)?);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| TracingError::AlreadyInstalled)?;

    tracing::debug!("Writing trace log to {}", log_path.display());
    Ok(log_path)
}

fn open_log_file(path: &Path) -> Result<File, TracingError> {
    let to_error = |source| TracingError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(to_error)?;
    }
    File::create(path).map_err(to_error)
}

fn quiet_filter(level: Level) -> Result<EnvFilter, TracingError> {
    let mut filter = EnvFilter::new(level.as_str());
    for directive in QUIET_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Console verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    /// Piece completions and session summary
    Info,
    /// Tracker announces and peer lifecycles
    Debug,
    /// Every wire message
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}
