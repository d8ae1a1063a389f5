//! Model validation errors.

use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("camera id must not be empty")]
    EmptyCameraId,

    #[error("camera `{camera}` stream uri must not be empty")]
    EmptyStreamUri { camera: String },

    #[error("stage name must not be empty")]
    EmptyStageName,

    #[error("stage `{stage}` must have at least one worker")]
    NoWorkers { stage: String },

    #[error("stage `{stage}` queue capacity must be greater than zero")]
    ZeroQueueCapacity { stage: String },

    #[error("object confidence {confidence} is outside [0, 1]")]
    ConfidenceOutOfRange { confidence: f32 },

    #[error("unknown device target `{device}` (expected `cpu`, `gpu`, or `gpu:<index>`)")]
    UnknownDevice { device: String },
}
