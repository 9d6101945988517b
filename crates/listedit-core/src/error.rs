//! Error types for listedit.
//!
//! `RequestError` (see [`crate::classify`]) is the shape a single remote call
//! fails with; `ListEditError` is what the rest of the crate and its callers
//! see, including governor-level outcomes such as cancellation.

use crate::classify::RequestError;
use thiserror::Error;

/// Main error type for listedit.
#[derive(Debug, Error)]
pub enum ListEditError {
    /// The operation settled with a final (non-retryable or retries-exhausted) failure.
    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    /// The operation was abandoned before dispatch by `stop()` or `reset()`.
    #[error("Request cancelled before dispatch")]
    Cancelled,

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for listedit operations.
pub type Result<T> = std::result::Result<T, ListEditError>;

impl ListEditError {
    /// Shorthand for a validation failure on a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ListEditError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from an operation that was never dispatched.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ListEditError::Cancelled)
    }

    /// The underlying request failure, if this error wraps one.
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            ListEditError::Request(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this error is worth retrying at a higher level.
    ///
    /// Uses the default classifier; the governor has already exhausted its own
    /// retries by the time a `Request` error reaches a caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            ListEditError::Request(e) => {
                use crate::classify::ErrorClassifier;
                crate::classify::DefaultClassifier::new()
                    .classify(e)
                    .is_retryable()
            }
            ListEditError::Network { .. } => true,
            _ => false,
        }
    }
}
