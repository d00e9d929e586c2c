//! Typed error enums at subsystem boundaries; `anyhow` everywhere else
//! (HTTP handlers, `main`).

use thiserror::Error;

/// Failures from the external key/value store adapter.
#[derive(Debug, Error)]
pub enum ConcCacheError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("key not found")]
    NotFound,
    #[error("malformed store payload: {0}")]
    Malformed(String),
}

/// Failures surfaced by [`crate::worker::master::Master`] operations.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("queue full")]
    QueueFull,
    #[error("task queuing is disabled")]
    Disabled,
    #[error("unknown task id")]
    UnknownTask,
    #[error("worker spawn failed: {0}")]
    SpawnFailed(String),
}

/// Top-level error type for configuration loading and process bootstrap.
#[derive(Debug, Error)]
pub enum ConcdError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}
