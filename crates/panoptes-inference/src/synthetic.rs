//! Deterministic backends for tests and the demo daemon.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use panoptes_models::{
    ClassifiedObject, Detection, DeviceTarget, Frame, NormalizedRect, ObjectBox,
};

use crate::classifier::Classifier;
use crate::detector::Detector;
use crate::error::ProcessingResult;

/// A [`Detector`] that fabricates boxes from the frame's sequence number.
///
/// The output is a pure function of the frame id, so tests can predict
/// it exactly:
///
/// - every frame whose sequence is not a multiple of 3 contains a
///   `person`;
/// - every fourth frame contains a `vehicle`;
/// - multiples of 3 that are not multiples of 4 are empty.
pub struct SyntheticDetector {
    device: DeviceTarget,
}

impl SyntheticDetector {
    pub fn new(device: DeviceTarget) -> Self {
        debug!(device = %device, "synthetic detector ready");
        Self { device }
    }

    pub fn device(&self) -> DeviceTarget {
        self.device
    }

    fn confidence(sequence: u64) -> f32 {
        0.50 + ((sequence * 7) % 50) as f32 / 100.0
    }
}

#[async_trait]
impl Detector for SyntheticDetector {
    fn name(&self) -> &str {
        "synthetic-detector"
    }

    async fn detect(&self, frame: &Frame) -> ProcessingResult<Vec<ObjectBox>> {
        let sequence = frame.id.sequence;
        let mut objects = Vec::new();
        if sequence % 3 != 0 {
            let x = (sequence % 5) as f64 * 0.1;
            objects.push(ObjectBox::new(
                "person",
                Self::confidence(sequence),
                NormalizedRect::new(x, 0.2, 0.2, 0.5),
            ));
        }
        if sequence % 4 == 0 {
            let y = ((sequence / 4) % 4) as f64 * 0.1;
            objects.push(ObjectBox::new(
                "vehicle",
                Self::confidence(sequence + 1),
                NormalizedRect::new(0.5, y, 0.3, 0.25),
            ));
        }
        Ok(objects)
    }
}

/// A [`Classifier`] backed by a label-to-class lookup table.
///
/// Labels missing from the table fall back to the default class
/// (`"unknown"` unless overridden). The demo daemon maps `person` to
/// `human` and leaves everything else on the fallback.
pub struct LabelMapClassifier {
    device: DeviceTarget,
    classes: HashMap<String, String>,
    default_class: String,
}

impl LabelMapClassifier {
    pub fn new(device: DeviceTarget) -> Self {
        debug!(device = %device, "label map classifier ready");
        Self {
            device,
            classes: HashMap::new(),
            default_class: "unknown".to_string(),
        }
    }

    pub fn with_mapping(mut self, label: impl Into<String>, class: impl Into<String>) -> Self {
        self.classes.insert(label.into(), class.into());
        self
    }

    pub fn with_default_class(mut self, class: impl Into<String>) -> Self {
        self.default_class = class.into();
        self
    }

    pub fn device(&self) -> DeviceTarget {
        self.device
    }
}

#[async_trait]
impl Classifier for LabelMapClassifier {
    fn name(&self) -> &str {
        "label-map-classifier"
    }

    async fn classify(&self, detection: &Detection) -> ProcessingResult<Vec<ClassifiedObject>> {
        let objects = detection
            .objects
            .iter()
            .map(|object| {
                let class = self
                    .classes
                    .get(&object.label)
                    .cloned()
                    .unwrap_or_else(|| self.default_class.clone());
                ClassifiedObject::new(object.clone(), class)
            })
            .collect();
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use panoptes_models::{CameraId, FrameId};

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            FrameId::new(CameraId::new("gate"), sequence),
            vec![0u8; 16],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_detector_output_is_deterministic() {
        let detector = SyntheticDetector::new(DeviceTarget::Cpu);
        let first = detector.detect(&frame(5)).await.unwrap();
        let second = detector.detect(&frame(5)).await.unwrap();
        assert_eq!(first, second);

        for object in &first {
            assert!(object.validate().is_ok());
            assert!(object.region.is_valid());
        }
    }

    #[tokio::test]
    async fn test_detector_schedule() {
        let detector = SyntheticDetector::new(DeviceTarget::Gpu { index: 0 });

        // seq 1: person only.
        let labels = |objects: Vec<ObjectBox>| -> Vec<String> {
            objects.into_iter().map(|o| o.label).collect()
        };
        assert_eq!(labels(detector.detect(&frame(1)).await.unwrap()), ["person"]);
        // seq 3: multiple of 3, not of 4 -> empty frame.
        assert!(detector.detect(&frame(3)).await.unwrap().is_empty());
        // seq 4: person and vehicle.
        assert_eq!(
            labels(detector.detect(&frame(4)).await.unwrap()),
            ["person", "vehicle"]
        );
        // seq 12: vehicle only.
        assert_eq!(
            labels(detector.detect(&frame(12)).await.unwrap()),
            ["vehicle"]
        );
    }

    #[tokio::test]
    async fn test_classifier_maps_and_falls_back() {
        let classifier = LabelMapClassifier::new(DeviceTarget::Cpu)
            .with_mapping("person", "human");

        let region = NormalizedRect::new(0.1, 0.1, 0.2, 0.2);
        let detection = Detection::new(
            FrameId::new(CameraId::new("gate"), 8),
            Utc::now(),
            vec![
                ObjectBox::new("person", 0.9, region),
                ObjectBox::new("vehicle", 0.8, region),
            ],
        );

        let classified = classifier.classify(&detection).await.unwrap();
        assert_eq!(classified.len(), 2);
        assert_eq!(classified[0].class_label, "human");
        assert_eq!(classified[1].class_label, "unknown");
    }
}
