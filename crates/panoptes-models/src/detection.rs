//! Detection artifacts produced from a single frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::frame::FrameId;

/// A rectangle in normalized frame coordinates.
///
/// All values live in `[0, 1]` relative to the frame size, so regions
/// stay meaningful when the underlying resolution changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    /// Left edge; 0.0 is the left border of the frame.
    pub x: f64,
    /// Top edge; 0.0 is the top border of the frame.
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check the rectangle has positive area and stays inside the unit
    /// square, with a small tolerance for float rounding.
    pub fn is_valid(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.001
            && self.y + self.height <= 1.001
    }
}

/// One detected object: what the detector thinks it is, how sure it is,
/// and where in the frame it sits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectBox {
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    pub region: NormalizedRect,
}

impl ObjectBox {
    pub fn new(label: impl Into<String>, confidence: f32, region: NormalizedRect) -> Self {
        Self {
            label: label.into(),
            confidence,
            region,
        }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange {
                confidence: self.confidence,
            });
        }
        Ok(())
    }
}

/// Detection result for one frame.
///
/// References the frame by id only; the payload stays with whoever owns
/// the frame. A detection always comes from a fully decoded frame and is
/// consumed exactly once by the classification stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub frame: FrameId,
    /// Capture timestamp carried forward for end-to-end latency.
    pub captured_at: DateTime<Utc>,
    /// Detected objects, in detector output order.
    pub objects: Vec<ObjectBox>,
}

impl Detection {
    pub fn new(frame: FrameId, captured_at: DateTime<Utc>, objects: Vec<ObjectBox>) -> Self {
        Self {
            frame,
            captured_at,
            objects,
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}
