use std::fmt;

use crate::{ResponseEnvelope, ResponseType};

/// Stage an execution was in when it got aborted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbortPhase {
    /// Between attempts, during the retry wait.
    Waiting,
    /// While an attempt was in flight.
    Connection,
}

impl fmt::Display for AbortPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => f.write_str("waiting"),
            Self::Connection => f.write_str("connection"),
        }
    }
}

/// Details attached to abort and timeout errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AbortDetails {
    /// Attempts started before the abort.
    pub tries: u32,
    pub phase: AbortPhase,
    /// The per-attempt timer fired.
    pub timeout: bool,
    /// The total-budget timer fired.
    pub global_timeout: bool,
}

/// Discriminant of [`ExecutionError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    Abort,
    Timeout,
    HttpClient,
    HttpServer,
    ResponseDataTypeMismatch,
    CacheMiss,
    Unknown,
}

/// Error type returned by an execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Cancelled through the task handle, not by a timer.
    #[error("request aborted while {}", .details.phase)]
    Abort { details: AbortDetails },
    /// The per-attempt or the total timer fired.
    #[error("request timed out while {} after {} tries", .details.phase, .details.tries)]
    Timeout { details: AbortDetails },
    /// Response classified as a client error.
    #[error("http client error {}: {}", .response.status, .response.status_text)]
    HttpClient { response: Box<ResponseEnvelope> },
    /// Response classified as a server error.
    #[error("http server error {}: {}", .response.status, .response.status_text)]
    HttpServer { response: Box<ResponseEnvelope> },
    /// Body did not decode as the expected type, whatever the status.
    #[error("unexpected type of data received, expected {expected:?}")]
    ResponseDataTypeMismatch {
        response: Box<ResponseEnvelope>,
        expected: ResponseType,
    },
    /// `cache-only` load with nothing stored under the key.
    #[error("no cached response under key `{key}`")]
    CacheMiss { key: String },
    /// Anything else, normalized.
    #[error("{message}")]
    Unknown {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Abort { .. } => ErrorKind::Abort,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::HttpClient { .. } => ErrorKind::HttpClient,
            Self::HttpServer { .. } => ErrorKind::HttpServer,
            Self::ResponseDataTypeMismatch { .. } => ErrorKind::ResponseDataTypeMismatch,
            Self::CacheMiss { .. } => ErrorKind::CacheMiss,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Response attached to HTTP and mismatch errors.
    pub fn response(&self) -> Option<&ResponseEnvelope> {
        match self {
            Self::HttpClient { response }
            | Self::HttpServer { response }
            | Self::ResponseDataTypeMismatch { response, .. } => Some(&**response),
            _ => None,
        }
    }

    pub fn abort_details(&self) -> Option<&AbortDetails> {
        match self {
            Self::Abort { details } | Self::Timeout { details } => Some(details),
            _ => None,
        }
    }

    pub(crate) fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
            source: None,
        }
    }

    /// Timeout when any timer fired, plain abort otherwise.
    pub(crate) fn aborted(details: AbortDetails) -> Self {
        if details.timeout || details.global_timeout {
            Self::Timeout { details }
        } else {
            Self::Abort { details }
        }
    }
}

/// Failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The attempt's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<TransportError> for ExecutionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Other(source) => Self::Unknown {
                message: source.to_string(),
                source: Some(source),
            },
            TransportError::Cancelled => Self::unknown("request cancelled"),
        }
    }
}

/// Failure reported by a [`CacheStore`](crate::CacheStore).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache entry encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::{AbortDetails, AbortPhase, ErrorKind, ExecutionError, TransportError};

    fn details(timeout: bool, global_timeout: bool) -> AbortDetails {
        AbortDetails {
            tries: 2,
            phase: AbortPhase::Connection,
            timeout,
            global_timeout,
        }
    }

    #[test]
    fn timer_aborts_become_timeouts() {
        assert_eq!(
            ExecutionError::aborted(details(true, false)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ExecutionError::aborted(details(false, true)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ExecutionError::aborted(details(false, false)).kind(),
            ErrorKind::Abort
        );
    }

    #[test]
    fn transport_failures_normalize_to_unknown() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ExecutionError::from(TransportError::Other(Box::new(io)));
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.to_string(), "refused");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn display_mentions_phase() {
        let err = ExecutionError::aborted(details(false, true));
        assert_eq!(err.to_string(), "request timed out while connection after 2 tries");
    }
}
