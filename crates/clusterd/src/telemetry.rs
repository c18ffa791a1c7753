//! Structured telemetry initialisation for the supervisor.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clusterd_config::{LogFormat, RuntimeSettings};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Standard error; used in foreground mode and before the log file is
    /// known to be writable.
    Stderr,
    /// Append to the cluster log file.
    File(PathBuf),
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// The log file could not be opened for appending.
    #[error("failed to open log file '{path}': {source}")]
    LogFile {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Filter expression for the configured base filter and the `-d` count.
#[must_use]
pub fn filter_directive(settings: &RuntimeSettings, debug_level: u8) -> String {
    match debug_level {
        0 => settings.log_filter.clone(),
        1 => "debug".to_owned(),
        _ => "trace".to_owned(),
    }
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Repeated calls are idempotent: the first invocation installs the global
/// subscriber and later invocations return a fresh [`TelemetryHandle`]
/// without touching the global state again. This lets the supervisor fall
/// back to stderr when the configuration cannot be read and still call
/// [`initialise`] unconditionally afterwards.
pub fn initialise(
    settings: &RuntimeSettings,
    sink: &LogSink,
    debug_level: u8,
) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(settings, sink, debug_level))
        .map(|()| TelemetryHandle)
}

fn open_log(path: &Path) -> Result<File, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TelemetryError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

fn install_subscriber(
    settings: &RuntimeSettings,
    sink: &LogSink,
    debug_level: u8,
) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(filter_directive(settings, debug_level))
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let (writer, ansi) = match sink {
        LogSink::Stderr => (BoxMakeWriter::new(io::stderr), io::stderr().is_terminal()),
        LogSink::File(path) => (BoxMakeWriter::new(Mutex::new(open_log(path)?)), false),
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match settings.log_format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
