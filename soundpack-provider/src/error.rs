//! Error types for soundpack-provider.

use std::time::Duration;

use thiserror::Error;

use soundpack_core::FailureKind;

/// Provider failures, classified by how the sync engine must react.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Network, timeout, 4xx/5xx or malformed response. Not retried.
    #[error("provider request failed: {message}")]
    Request { message: String },

    /// Throttled. Retried with backoff, then reported for the entry.
    #[error("provider rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Credentials rejected. Aborts the whole run.
    #[error("provider authentication failed: {message}")]
    Auth { message: String },

    /// The run was stopped while this call waited to be retried.
    #[error("cancelled: {message}")]
    Cancelled { message: String },
}

impl ProviderError {
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Request { .. } => FailureKind::ProviderRequest,
            Self::RateLimit { .. } => FailureKind::ProviderRateLimit,
            Self::Auth { .. } => FailureKind::ProviderAuth,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit { .. })
    }

    /// Errors that must stop every remaining synthesis call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
