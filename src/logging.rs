//! Diagnostic tracing for the conductor binary.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to
//!   stderr plus a JSON file under `.conductor/logs/`.
//!
//! - **Run journal (`journal`)**: Product artifacts in `.conductor/journal/`.
//!   Always written, unaffected by `RUST_LOG`.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset. Stderr gets a compact
/// human-readable layer; when `log_dir` is given, a JSON layer appends to
/// `conductor.log` in that directory with daily rotation.
///
/// The returned guard flushes the file writer on drop, so the caller must
/// keep it alive for the life of the process.
///
/// # Example
/// ```bash
/// RUST_LOG=conductor=debug conductor run
/// ```
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).compact();

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "conductor.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().json().with_ansi(false).with_writer(file_writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
