//! Error types for gatherd-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from config and stream storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The persisted document exists but could not be parsed.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// JSON error on stream metadata or datapoints.
    #[error("stream JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// Datapoint inserted into a stream that was never added.
    #[error("stream '{0}' does not exist")]
    UnknownStream(String),

    /// Stream name that cannot be used as a file name.
    #[error("invalid stream name '{0}'")]
    InvalidStreamName(String),

    /// The first-run initializer refused to produce a document.
    #[error("first-run initialization failed: {0}")]
    Initialize(String),
}

/// Failure reported by a single gatherer's `start`, `stop` or `run`.
#[derive(Debug, Error)]
pub enum GathererError {
    /// The gatherer could not sample its source.
    #[error("sampling failed: {0}")]
    Sample(String),

    /// Writing the sample into the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GathererError {
    pub fn sample(message: impl Into<String>) -> Self {
        Self::Sample(message.into())
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
