//! Error types for soundpack-sync.

use std::path::PathBuf;

use thiserror::Error;

use soundpack_core::TemplateError;

/// Structural errors that stop a sync before (or instead of) any provider
/// call. Per-entry failures are reported in the result, not here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// The soundpack directory could not be read.
    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn scan_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Scan {
        path: path.into(),
        source,
    }
}
