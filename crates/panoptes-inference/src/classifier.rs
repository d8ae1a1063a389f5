//! The object-classification seam.

use async_trait::async_trait;

use panoptes_models::{ClassifiedObject, Detection};

use crate::error::ProcessingResult;

/// Assigns a class label to every object a detection carries.
///
/// Called once per detection artifact, not once per object; a backend
/// that batches per frame maps naturally onto this. Like [`Detector`],
/// implementations are shared across workers behind an `Arc`.
///
/// [`Detector`]: crate::detector::Detector
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Backend name used in logs and error context.
    fn name(&self) -> &str;

    async fn classify(&self, detection: &Detection) -> ProcessingResult<Vec<ClassifiedObject>>;
}
