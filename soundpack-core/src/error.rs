//! Error types for soundpack-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template file could not be read.
    #[error("I/O error reading template at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed structure: not valid JSON/YAML, or not a list of entries.
    #[error("failed to parse template {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Structurally valid, but an entry breaks a template invariant.
    #[error("invalid template entry #{index} ({path:?}): {reason}")]
    Validation {
        index: usize,
        path: String,
        reason: String,
    },
}

impl TemplateError {
    pub(crate) fn validation(index: usize, path: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            index,
            path: path.to_owned(),
            reason: reason.into(),
        }
    }

    /// `true` for [`TemplateError::Parse`].
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    /// `true` for [`TemplateError::Validation`].
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
