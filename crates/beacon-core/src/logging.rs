//! Logging infrastructure for Beacon.
//!
//! Structured logging using the `tracing` ecosystem. The error tracker, retry
//! engine and alert queue all emit `tracing` events; this module decides where
//! those events go.
//!
//! ## Features
//!
//! - JSON lines format for machine parsing
//! - File output to `~/.beacon/logs/beacon.log`
//! - Console output with configurable verbosity
//!
//! ## Example
//!
//! ```no_run
//! use beacon_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//!
//! tracing::info!("Beacon started");
//! tracing::debug!(alert_id = 7, "alert dismissed");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{BeaconError, Result};

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Keep this guard alive for the lifetime of the application.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the Beacon logging system.
///
/// This sets up:
/// - File logging to `~/.beacon/logs/beacon.log` (JSON lines format)
/// - Console logging to stderr (human-readable format)
///
/// # Arguments
///
/// * `log_dir` - Optional custom log directory. Defaults to `~/.beacon/logs/`
/// * `verbose` - If true, sets log level to DEBUG. Otherwise uses INFO.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let (log_dir, non_blocking_file, file_guard) = file_writer(log_dir)?;

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| BeaconError::internal(format!("logging already initialized: {e}")))?;

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Initialize file-only logging for full-screen terminal sessions.
///
/// A console layer would scribble over the alternate screen, so the demo
/// binary uses this variant.
pub fn init_file_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let (_, non_blocking_file, file_guard) = file_writer(log_dir)?;

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .json(),
        )
        .try_init()
        .map_err(|e| BeaconError::internal(format!("logging already initialized: {e}")))?;

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Daily-rolling `beacon.log` writer in `log_dir` (created if missing).
fn file_writer(log_dir: Option<PathBuf>) -> Result<(PathBuf, NonBlocking, WorkerGuard)> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| BeaconError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "beacon.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    Ok((log_dir, writer, guard))
}

/// `RUST_LOG` if set, else `beacon=debug` or `beacon=info`.
fn env_filter(verbose: bool) -> EnvFilter {
    let default_level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("beacon={default_level}")))
}

/// Initialize minimal console-only logging for testing.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Get the default log directory path.
///
/// Returns `~/.beacon/logs/`
pub fn default_log_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| BeaconError::Internal {
        message: "home directory could not be determined".into(),
    })?;

    Ok(home.join(".beacon").join("logs"))
}

/// Convenience macro for logging alert lifecycle events.
///
/// # Example
///
/// ```ignore
/// log_alert_event!(3, "shown");
/// log_alert_event!(3, "evicted", reason = "capacity");
/// ```
#[macro_export]
macro_rules! log_alert_event {
    ($alert_id:expr, $event:expr) => {
        tracing::debug!(
            target: "beacon::alert",
            alert_id = $alert_id,
            event = $event,
            "alert event"
        )
    };
    ($alert_id:expr, $event:expr, $($field:tt)*) => {
        tracing::debug!(
            target: "beacon::alert",
            alert_id = $alert_id,
            event = $event,
            $($field)*,
            "alert event"
        )
    };
}
