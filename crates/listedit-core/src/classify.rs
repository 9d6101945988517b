//! Failure classification for governed requests.
//!
//! Remote failures are normalized once, at the network boundary, into the
//! closed [`RequestError`] shape. The governor then asks an
//! [`ErrorClassifier`] whether a failure is worth retrying:
//! - `RateLimited`: the service throttled us (retryable, counted as a rate-limit hit)
//! - `TransientNetwork`: 5xx-class or connection reset/timeout (retryable)
//! - `Fatal`: everything else, never retried

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Low-level transport failure kinds the classifier cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    ConnectionReset,
    Timeout,
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::ConnectionReset => write!(f, "connection reset"),
            TransportKind::Timeout => write!(f, "timeout"),
            TransportKind::Other => write!(f, "transport"),
        }
    }
}

/// A single failed remote call, as seen by the governor.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestError {
    /// The proxy answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced an HTTP response.
    #[error("{kind} error: {message}")]
    Transport { kind: TransportKind, message: String },

    /// A success-status response that carried an error payload.
    #[error("{text}")]
    Message { text: String },
}

impl RequestError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        RequestError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        RequestError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        RequestError::Message { text: text.into() }
    }

    /// HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable text attached to the failure.
    pub fn text(&self) -> &str {
        match self {
            RequestError::Http { message, .. } => message,
            RequestError::Transport { message, .. } => message,
            RequestError::Message { text } => text,
        }
    }
}

/// Outcome of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    RateLimited,
    TransientNetwork,
    Fatal,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::Fatal)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::RateLimited => write!(f, "rate-limited"),
            FailureClass::TransientNetwork => write!(f, "transient"),
            FailureClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Decides whether a failed request should be retried.
///
/// Upstream error shapes drift, so the governor accepts any implementation.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &RequestError) -> FailureClass;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&RequestError) -> FailureClass + Send + Sync,
{
    fn classify(&self, error: &RequestError) -> FailureClass {
        self(error)
    }
}

/// Status code the upstream uses for throttling.
pub const TOO_MANY_REQUESTS: u16 = 429;

const RATE_LIMIT_PHRASES: &[&str] = &["rate limit", "too many requests", "throttled"];
const TRANSIENT_STATUSES: &[u16] = &[500, 502, 503, 504];

/// Classifier for the upstream media-tracking API.
///
/// Checks, in order: HTTP 429, rate-limit phrases in the message text,
/// transient 5xx statuses and transport resets/timeouts. Anything else is fatal.
#[derive(Debug, Clone)]
pub struct DefaultClassifier {
    rate_limit_phrases: Vec<String>,
    transient_statuses: Vec<u16>,
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self {
            rate_limit_phrases: RATE_LIMIT_PHRASES.iter().map(|p| p.to_string()).collect(),
            transient_statuses: TRANSIENT_STATUSES.to_vec(),
        }
    }
}

impl DefaultClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat messages containing `phrase` (case-insensitive) as throttling.
    pub fn with_rate_limit_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.rate_limit_phrases.push(phrase.into().to_lowercase());
        self
    }

    /// Treat `status` as a transient server failure.
    pub fn with_transient_status(mut self, status: u16) -> Self {
        if !self.transient_statuses.contains(&status) {
            self.transient_statuses.push(status);
        }
        self
    }

    fn mentions_rate_limit(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.rate_limit_phrases
            .iter()
            .any(|phrase| text.contains(phrase.as_str()))
    }
}

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &RequestError) -> FailureClass {
        if error.status() == Some(TOO_MANY_REQUESTS) {
            return FailureClass::RateLimited;
        }

        if self.mentions_rate_limit(error.text()) {
            return FailureClass::RateLimited;
        }

        match error {
            RequestError::Http { status, .. } if self.transient_statuses.contains(status) => {
                FailureClass::TransientNetwork
            }
            RequestError::Transport {
                kind: TransportKind::ConnectionReset | TransportKind::Timeout,
                ..
            } => FailureClass::TransientNetwork,
            _ => FailureClass::Fatal,
        }
    }
}
