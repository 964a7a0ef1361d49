//! Error types for the delivery pipeline.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors surfaced by the delivery pipeline.
///
/// Send failures are not errors here: they are recorded on the attempt
/// and drive the retry policy instead.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Invalid pipeline configuration.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// What was rejected.
        message: String,
    },

    /// Workers did not drain within the shutdown grace period.
    #[error("delivery pool shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The grace period that elapsed.
        timeout: Duration,
    },

    /// Unexpected internal failure.
    #[error("internal delivery error: {message}")]
    Internal {
        /// Failure description.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}
