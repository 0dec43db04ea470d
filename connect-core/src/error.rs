//! Error types shared by all destination adapters
//!
//! The taxonomy mirrors how failures are handled downstream:
//! - `Config`: bad or missing configuration, surfaced synchronously, never retried
//! - `InvalidState`: the adapter reached a state it cannot recover from in-process
//! - `Fatal`: a bootstrap or write call failed outright; the caller decides what to do
//! - `Retryable`: a transient failure expected to clear on retry

use thiserror::Error;

/// Boxed source error carried alongside a message.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used across all connector crates.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Error type for destination adapters.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Configuration error - fatal, never retried
    #[error("configuration error: {0}")]
    Config(String),

    /// The adapter is in a state it cannot recover from without a restart
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unrecoverable failure of a backend call
    #[error("{message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },

    /// Transient failure expected to clear on retry
    #[error("{message}")]
    Retryable {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },
}

impl ConnectorError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    /// Create a fatal error wrapping an underlying cause.
    pub fn fatal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a retryable error wrapping an underlying cause.
    pub fn retryable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Retryable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error is classified as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// Whether this error is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
