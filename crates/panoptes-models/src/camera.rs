//! Camera identity and stream configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::{ValidationError, ValidationResult};

/// Unique identifier for a camera stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    /// Create a camera id from a caller-supplied name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Reconnect behavior for a live stream source.
///
/// A transient connection loss is retried with exponential backoff; the
/// source gives up and reports a fatal error after `max_attempts`
/// consecutive failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Consecutive failed connection attempts before the source is fatal.
    pub max_attempts: u32,
    /// Backoff applied between reconnection attempts.
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
        }
    }
}

/// Configuration for one camera stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera identity, used to key pipelines and metrics.
    pub id: CameraId,
    /// Stream uri (e.g. `rtsp://10.0.0.17:554/live`).
    pub uri: String,
    /// Reconnect policy for the live source.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl CameraConfig {
    /// Create a camera config with the default reconnect policy.
    pub fn new(id: impl Into<CameraId>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Override the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Check the config is usable before a pipeline is built from it.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.id.as_str().is_empty() {
            return Err(ValidationError::EmptyCameraId);
        }
        if self.uri.is_empty() {
            return Err(ValidationError::EmptyStreamUri {
                camera: self.id.to_string(),
            });
        }
        Ok(())
    }
}

impl From<String> for CameraId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}
