//! Pipeline lifecycle errors and structured failure records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use panoptes_ingest::ConnectionError;
use panoptes_models::{CameraId, PipelineState, ValidationError};

/// Convenience alias for pipeline and manager operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors surfaced by pipeline and manager operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// The requested lifecycle operation is not legal from the current state.
    #[error("operation requires pipeline state `{expected}`, but it is `{actual}`")]
    InvalidState {
        expected: PipelineState,
        actual: PipelineState,
    },

    #[error("camera `{0}` is already registered")]
    DuplicateCamera(CameraId),

    #[error("camera `{0}` is not registered")]
    NotFound(CameraId),

    /// The manager has shut down and no longer accepts cameras.
    #[error("pipeline manager is shut down")]
    ShutDown,

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("failed to open source: {0}")]
    Source(#[from] ConnectionError),
}

impl PipelineError {
    pub fn invalid_state(expected: PipelineState, actual: PipelineState) -> Self {
        Self::InvalidState { expected, actual }
    }
}

/// What brought a pipeline down.
///
/// Created at the failure site and carried through the supervisor to the
/// manager, event subscribers, and `statuses()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub camera: CameraId,
    /// Originating component, either a stage name or `"source"`.
    pub origin: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl FailureReason {
    pub fn new(camera: CameraId, origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            camera,
            origin: origin.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "camera `{}` failed in `{}`: {}",
            self.camera, self.origin, self.message
        )
    }
}
