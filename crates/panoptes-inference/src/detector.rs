//! The object-detection seam.

use async_trait::async_trait;

use panoptes_models::{Frame, ObjectBox};

use crate::error::ProcessingResult;

/// Finds objects in one decoded frame.
///
/// Implementations are shared across a stage's worker pool behind an
/// `Arc`, so they take `&self` and must be internally synchronized if
/// they hold mutable state. Boxes are returned in backend output order
/// with normalized regions and confidences in `[0, 1]`.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Backend name used in logs and error context.
    fn name(&self) -> &str;

    async fn detect(&self, frame: &Frame) -> ProcessingResult<Vec<ObjectBox>>;
}
