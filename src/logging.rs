//! Structured logging setup. Mirrors `setup_logging` in the teacher's
//! `main.rs`: `tracing-subscriber` with an `EnvFilter` and a compact `fmt`
//! layer, optionally mirrored to a single append-mode log file. Never
//! panics — a file that can't be opened falls back to stderr-only.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialise global logging. Returns a guard that must be kept alive for
/// the lifetime of the process when file logging is active (dropping it
/// flushes the non-blocking writer).
pub fn setup_logging(log_path: &str) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_path.is_empty() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
        return None;
    }

    let path = std::path::Path::new(log_path);
    let (dir, file_name) = match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) if !dir.as_os_str().is_empty() => (dir, name),
        _ => (std::path::Path::new("."), path.as_os_str()),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact())
                    .init();
                tracing::warn!(
                    error = %err,
                    path = log_path,
                    "failed to create log directory, logging to stderr only"
                );
                return None;
            }
        }
    }

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    Some(guard)
}
