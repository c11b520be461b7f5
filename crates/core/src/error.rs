use std::time::Duration;

use thiserror::Error;

pub type PortalResult<T> = Result<T, PortalError>;

/// Errors surfaced by the portal client stack.
///
/// `Clone` so that every caller joined on a single in-flight request observes
/// the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid tenant code: {0}")]
    InvalidTenant(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Queue cleared before the request started")]
    QueueCleared,

    #[error("Request timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("Request aborted before it settled")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// True for failures synthesized by the request queue rather than by the
    /// wrapped operation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::QueueCleared | Self::TimedOut { .. } | Self::Aborted
        )
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for PortalError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl From<config::ConfigError> for PortalError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Synthetic failure delivered by the request queue to an item it did not let
/// run to completion. Caller error types opt in via `From<Rejection>`, which
/// leaves the operation's own errors untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The item was still queued when the queue was cleared.
    Cleared,
    /// The item started but did not settle within the configured timeout.
    TimedOut(Duration),
    /// The item's task ended without producing a result (it panicked).
    Aborted,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cleared => f.write_str("queue cleared"),
            Self::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

impl std::error::Error for Rejection {}

impl From<Rejection> for PortalError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Cleared => Self::QueueCleared,
            Rejection::TimedOut(after) => Self::TimedOut {
                after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            },
            Rejection::Aborted => Self::Aborted,
        }
    }
}
