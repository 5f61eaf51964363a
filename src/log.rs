//! Structured logging for conductor.
//!
//! Log levels:
//! - ERROR: A worker monitor was lost or a result could not be recorded
//! - WARN: Task failures, aborted executions, invalid graphs
//! - INFO: Plan creation, phase and execution boundaries
//! - DEBUG: Worker spawns, skipped tasks, artifact merges
//! - TRACE: Progress relays and dropped events
//!
//! Debug mode can be enabled with `--debug` flag or `CONDUCTOR_DEBUG=1` env
//! var. `RUST_LOG` overrides both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to ~/.conductor/conductor.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Falls back to stderr when the log file cannot be created. Calling this
/// more than once is harmless; later calls are ignored.
pub fn init_with_debug(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug || env_debug())));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match log_file() {
        Some(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .try_init(),
        None => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    if installed.is_ok() {
        tracing::debug!(path = ?log_path(), "logging initialized");
    }
}

/// Where log lines go when the home directory is available.
pub fn log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".conductor").join("conductor.log"))
}

fn env_debug() -> bool {
    std::env::var("CONDUCTOR_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "conductor=debug"
    } else {
        "conductor=info"
    }
}

/// Truncated on startup.
fn log_file() -> Option<File> {
    let path = log_path()?;
    std::fs::create_dir_all(path.parent()?).ok()?;
    File::create(path).ok()
}
