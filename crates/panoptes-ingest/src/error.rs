//! Connection errors reported by frame sources.

use thiserror::Error;

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Failure while dialing or reading a camera stream.
///
/// Transient failures are retried inside the source according to its
/// [`ReconnectPolicy`](panoptes_models::ReconnectPolicy); only a fatal
/// error escapes to the pipeline, where it fails that camera's pipeline
/// and nothing else.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// A recoverable failure: the dial or the session dropped, and a
    /// reconnect attempt is worthwhile.
    #[error("transient connection failure for {uri}: {reason}")]
    Transient { uri: String, reason: String },

    /// The source gave up on this stream after `attempts` consecutive
    /// failures. The pipeline owning it transitions to `Failed`.
    #[error("connection to {uri} failed after {attempts} attempts: {reason}")]
    Fatal {
        uri: String,
        attempts: u32,
        reason: String,
    },
}

impl ConnectionError {
    pub fn transient(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        ConnectionError::Transient {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub fn fatal(uri: impl Into<String>, attempts: u32, reason: impl Into<String>) -> Self {
        ConnectionError::Fatal {
            uri: uri.into(),
            attempts,
            reason: reason.into(),
        }
    }

    /// True when no further reconnect attempt should be made.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionError::Fatal { .. })
    }

    /// The stream uri the failure relates to.
    pub fn uri(&self) -> &str {
        match self {
            ConnectionError::Transient { uri, .. } | ConnectionError::Fatal { uri, .. } => uri,
        }
    }

    /// The underlying failure description, without the uri framing.
    pub fn reason(&self) -> &str {
        match self {
            ConnectionError::Transient { reason, .. } | ConnectionError::Fatal { reason, .. } => {
                reason
            }
        }
    }
}
