//! Classification artifacts, the terminal output of a pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::{Detection, ObjectBox};
use crate::frame::FrameId;

/// One detected object plus the class label assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedObject {
    pub object: ObjectBox,
    pub class_label: String,
}

impl ClassifiedObject {
    pub fn new(object: ObjectBox, class_label: impl Into<String>) -> Self {
        Self {
            object,
            class_label: class_label.into(),
        }
    }
}

/// Classification result for one frame; consumed by the metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub frame: FrameId,
    /// Capture timestamp carried from the source frame.
    pub captured_at: DateTime<Utc>,
    pub objects: Vec<ClassifiedObject>,
}

impl Classification {
    pub fn new(frame: FrameId, captured_at: DateTime<Utc>, objects: Vec<ClassifiedObject>) -> Self {
        Self {
            frame,
            captured_at,
            objects,
        }
    }

    /// Build a classification from the detection it derives from.
    pub fn from_detection(detection: &Detection, objects: Vec<ClassifiedObject>) -> Self {
        Self {
            frame: detection.frame.clone(),
            captured_at: detection.captured_at,
            objects,
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}
