use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the orchestrator, control protocol, and daemon runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] gatherd_core::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown gatherer '{0}'")]
    UnknownGatherer(String),

    #[error("duplicate gatherer stream name '{0}'")]
    DuplicateGatherer(String),

    #[error("invalid gather interval {0}; expected a positive number of seconds")]
    InvalidInterval(f64),

    #[error("local server error: {0}")]
    LocalServer(String),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
