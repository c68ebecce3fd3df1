//! # Logging Utilities
//!
//! Logging infrastructure for ipft using `tracing`.
//!
//! stdout belongs to the tool's actual output (the function listing), so all
//! diagnostics go to stderr and, optionally, to a log file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ipft_utils::{init_logging, LogFormat, LogLevel};
//!
//! // Keep the guard alive until the program exits so file output is flushed
//! let _guard = init_logging(Some(LogLevel::Debug), Some(LogFormat::Pretty))
//!     .expect("Failed to initialize logging");
//!
//! tracing::info!("resolver started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Filter used when no explicit level is given (e.g. `ipft_core=debug`)
//! - `IPFT_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `IPFT_LOG_FILE`: Optional log file; a directory gets a dated `ipft.log` inside it

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "IPFT_LOG_FORMAT";
/// Environment variable naming the log file.
pub const LOG_FILE_ENV: &str = "IPFT_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines (default)
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level (CLI default)
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

/// Keeps the background file writer alive.
///
/// Dropping the guard flushes pending file output.
#[derive(Debug, Default)]
pub struct LoggingGuard
{
    file: Option<WorkerGuard>,
    file_path: Option<PathBuf>,
}

impl LoggingGuard
{
    /// Log file in use, if any.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path>
    {
        self.file_path.as_deref()
    }

    #[must_use]
    pub fn has_file(&self) -> bool
    {
        self.file.is_some()
    }
}

/// Install the global subscriber.
///
/// Level priority: `level` (the `--log-level` flag), then `RUST_LOG`, then
/// `warn`. Format priority: `format`, then `IPFT_LOG_FORMAT`, then pretty.
///
/// ## Errors
///
/// Returns an error if:
/// - `IPFT_LOG_FORMAT` holds an unknown format and no format was passed
/// - the log file cannot be created
/// - a global subscriber is already installed
pub fn init_logging(level: Option<LogLevel>, format: Option<LogFormat>) -> Result<LoggingGuard, LoggingError>
{
    let format = match format {
        Some(format) => format,
        None => format_from_env()?,
    };
    let explicit_level = level.map(Level::from);

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(
        format,
        io::stderr,
        io::stderr().is_terminal(),
        build_filter(explicit_level),
    )];

    let mut guard = LoggingGuard::default();
    if let Some(path) = std::env::var_os(LOG_FILE_ENV).map(PathBuf::from) {
        let path = resolve_log_file(path);
        let directory = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        std::fs::create_dir_all(&directory)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| LoggingError::InitializationFailed(format!("{} has no file name", path.display())))?;

        let appender = tracing_appender::rolling::never(&directory, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(fmt_layer(format, writer, false, build_filter(explicit_level)));
        guard.file = Some(worker);
        guard.file_path = Some(path);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

fn format_from_env() -> Result<LogFormat, LoggingError>
{
    match std::env::var(LOG_FORMAT_ENV) {
        Ok(value) if !value.trim().is_empty() => value.trim().parse(),
        _ => Ok(LogFormat::default()),
    }
}

/// Explicit level from the CLI wins; `RUST_LOG` allows per-crate filters.
fn build_filter(explicit_level: Option<Level>) -> EnvFilter
{
    if let Some(level) = explicit_level {
        return EnvFilter::new(level.to_string());
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::WARN.to_string()))
}

/// A directory gets `YYYY-MM-DD-ipft.log` inside it.
fn resolve_log_file(path: PathBuf) -> PathBuf
{
    if path.is_dir() {
        let today = Utc::now().format("%Y-%m-%d");
        path.join(format!("{today}-ipft.log"))
    } else {
        path
    }
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(writer);

    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("prod").unwrap(), LogFormat::Json);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(matches!(LogLevel::from_str("loud"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_explicit_level_overrides_environment()
    {
        let filter = build_filter(Some(Level::DEBUG));
        assert_eq!(filter.max_level_hint(), Some(tracing::level_filters::LevelFilter::DEBUG));
    }

    #[test]
    fn test_log_file_in_directory_is_dated()
    {
        let dir = std::env::temp_dir();
        let path = resolve_log_file(dir.clone());
        assert_eq!(path.parent(), Some(dir.as_path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-ipft.log"));
        assert_eq!(name.len(), "YYYY-MM-DD-ipft.log".len());

        let file = dir.join("trace.log");
        assert_eq!(resolve_log_file(file.clone()), file);
    }

    #[test]
    fn test_guard_without_file()
    {
        let guard = LoggingGuard::default();
        assert!(!guard.has_file());
        assert!(guard.file_path().is_none());
    }
}
