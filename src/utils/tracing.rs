//! Tracing Utilities Module
//!
//! Logging setup for the DeskPad binaries. The daemon logs to a file and to
//! stdout; the command-line client logs to stderr, and only on request.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter() -> EnvFilter {
    // Default to info level if RUST_LOG is not set
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes the daemon subscriber with file and console output.
///
/// # Arguments
/// * `log_path` - File the log lines are appended to
///
/// # Returns
/// * `Some(WorkerGuard)` - Keep it alive until exit so buffered lines get flushed
/// * `None` - The log file could not be opened; only stdout is used
pub fn setup_tracing(log_path: &Path) -> Option<WorkerGuard> {
    let file = OpenOptions::new().append(true).create(true).open(log_path);

    match file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter());
            let stdout_layer = fmt::layer()
                .with_writer(io::stdout)
                .with_ansi(true)
                .with_filter(env_filter());

            let _ = tracing_subscriber::registry()
                .with(file_layer)
                .with(stdout_layer)
                .try_init();
            Some(guard)
        }
        Err(e) => {
            let stdout_layer = fmt::layer()
                .with_writer(io::stdout)
                .with_ansi(true)
                .with_filter(env_filter());

            let _ = tracing_subscriber::registry().with(stdout_layer).try_init();
            ::tracing::warn!(
                "Cannot open log file {} ({}); logging to stdout only",
                log_path.display(),
                e
            );
            None
        }
    }
}

/// Initializes terminal logging on stderr for the command-line client.
pub fn setup_terminal_tracing() {
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(env_filter());

    let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
}
