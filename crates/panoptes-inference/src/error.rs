//! Processing errors raised by stage backends.

use thiserror::Error;

use panoptes_models::FrameId;

pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// A backend failed to process one item.
///
/// Carries the backend name and the frame it choked on, so the owning
/// stage can log and apply its error policy without re-deriving context.
/// The transient/permanent split is the hint retry policies act on:
/// retrying a permanent failure would just fail again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// Worth retrying: resource contention, a busy device, a timeout.
    #[error("{backend} failed on frame {frame}: {reason}")]
    Transient {
        backend: String,
        frame: FrameId,
        reason: String,
    },

    /// Retrying cannot help: malformed input, an unsupported payload.
    #[error("{backend} cannot process frame {frame}: {reason}")]
    Permanent {
        backend: String,
        frame: FrameId,
        reason: String,
    },
}

impl ProcessingError {
    pub fn transient(
        backend: impl Into<String>,
        frame: FrameId,
        reason: impl Into<String>,
    ) -> Self {
        ProcessingError::Transient {
            backend: backend.into(),
            frame,
            reason: reason.into(),
        }
    }

    pub fn permanent(
        backend: impl Into<String>,
        frame: FrameId,
        reason: impl Into<String>,
    ) -> Self {
        ProcessingError::Permanent {
            backend: backend.into(),
            frame,
            reason: reason.into(),
        }
    }

    /// True when a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessingError::Transient { .. })
    }

    /// The frame the backend failed on.
    pub fn frame(&self) -> &FrameId {
        match self {
            ProcessingError::Transient { frame, .. } | ProcessingError::Permanent { frame, .. } => {
                frame
            }
        }
    }
}
