//! The two analytics stages every camera pipeline runs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use panoptes_inference::{Classifier, Detector, ProcessingError};
use panoptes_models::{Classification, Detection, Frame};

use crate::sink::MetricsSink;
use crate::stage::{StageOutput, StageProcessor};

/// Detection stage: decoded frames in, detection artifacts out.
///
/// Successful detections are also counted into the metrics sink at the
/// moment they are produced, so `objects_detected` reflects what the
/// detector saw even when a later stage drops the item.
pub struct DetectionStage {
    detector: Arc<dyn Detector>,
    sink: Arc<MetricsSink>,
}

impl DetectionStage {
    pub fn new(detector: Arc<dyn Detector>, sink: Arc<MetricsSink>) -> Self {
        Self { detector, sink }
    }
}

#[async_trait]
impl StageProcessor for DetectionStage {
    type Input = Frame;
    type Output = Detection;

    async fn process(&self, frame: &Frame) -> Result<StageOutput<Detection>, ProcessingError> {
        let objects = self.detector.detect(frame).await?;
        trace!(frame = %frame.id, objects = objects.len(), "frame detected");
        let detection = Detection::new(frame.id.clone(), frame.captured_at, objects);
        self.sink.record_detection(&detection);
        Ok(StageOutput::Single(detection))
    }
}

/// Classification stage: detections in, terminal classifications out.
pub struct ClassificationStage {
    classifier: Arc<dyn Classifier>,
}

impl ClassificationStage {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl StageProcessor for ClassificationStage {
    type Input = Detection;
    type Output = Classification;

    async fn process(
        &self,
        detection: &Detection,
    ) -> Result<StageOutput<Classification>, ProcessingError> {
        let objects = self.classifier.classify(detection).await?;
        trace!(frame = %detection.frame, objects = objects.len(), "frame classified");
        Ok(StageOutput::Single(Classification::from_detection(
            detection, objects,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::{mpsc, watch};

    use panoptes_inference::{LabelMapClassifier, SyntheticDetector};
    use panoptes_models::{CameraId, DeviceTarget, FrameId, StageConfig};
    use panoptes_queue::StageQueue;

    use crate::stage::Stage;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            FrameId::new(CameraId::new("gate"), sequence),
            vec![0u8; 64],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_detection_stage_counts_objects_into_sink() {
        let sink = Arc::new(MetricsSink::new());
        let stage = DetectionStage::new(
            Arc::new(SyntheticDetector::new(DeviceTarget::Cpu)),
            Arc::clone(&sink),
        );

        // Sequence 4 produces a person and a vehicle.
        let output = stage.process(&frame(4)).await.unwrap();
        let detection = match output {
            StageOutput::Single(detection) => detection,
            StageOutput::Many(_) => panic!("detection stage emits single outputs"),
        };
        assert_eq!(detection.object_count(), 2);

        let snapshot = sink.snapshot();
        let camera = snapshot.camera(&CameraId::new("gate")).unwrap();
        assert_eq!(camera.objects_detected, 2);
        // Nothing reached the end of the pipeline yet.
        assert_eq!(camera.frames_processed, 0);
        assert_eq!(camera.objects_classified, 0);
    }

    #[tokio::test]
    async fn test_chained_stages_preserve_frame_identity_and_order() {
        let sink = Arc::new(MetricsSink::new());
        let frames = StageQueue::<Frame>::bounded("frames", 4);
        let detections = StageQueue::<Detection>::bounded("detections", 4);
        let classifications = StageQueue::<Classification>::bounded("classifications", 4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (failure_tx, _failure_rx) = mpsc::channel(1);

        let detect = Stage::new(
            CameraId::new("gate"),
            StageConfig::new("detect"),
            DetectionStage::new(
                Arc::new(SyntheticDetector::new(DeviceTarget::Cpu)),
                Arc::clone(&sink),
            ),
        )
        .spawn(
            frames.clone(),
            detections.clone(),
            cancel_rx.clone(),
            failure_tx.clone(),
        );
        let classify = Stage::new(
            CameraId::new("gate"),
            StageConfig::new("classify"),
            ClassificationStage::new(Arc::new(LabelMapClassifier::new(DeviceTarget::Cpu))),
        )
        .spawn(
            detections.clone(),
            classifications.clone(),
            cancel_rx,
            failure_tx,
        );

        for sequence in 1..=10u64 {
            frames.push(frame(sequence)).await.unwrap();
        }
        frames.close();

        let mut collected = Vec::new();
        while let Ok(item) = classifications.pop().await {
            collected.push(item);
        }
        detect.await.unwrap();
        classify.await.unwrap();

        // Every frame produced exactly one classification, in order,
        // referencing its source frame.
        assert_eq!(collected.len(), 10);
        for (index, classification) in collected.iter().enumerate() {
            assert_eq!(
                classification.frame,
                FrameId::new(CameraId::new("gate"), index as u64 + 1)
            );
        }
    }

    #[tokio::test]
    async fn test_classification_stage_maps_labels() {
        let stage = ClassificationStage::new(Arc::new(
            LabelMapClassifier::new(DeviceTarget::Cpu).with_mapping("person", "human"),
        ));
        let detector = SyntheticDetector::new(DeviceTarget::Cpu);

        let source_frame = frame(4);
        let objects = detector.detect(&source_frame).await.unwrap();
        let detection = Detection::new(source_frame.id.clone(), source_frame.captured_at, objects);

        let output = stage.process(&detection).await.unwrap();
        let classification = match output {
            StageOutput::Single(classification) => classification,
            StageOutput::Many(_) => panic!("classification stage emits single outputs"),
        };
        assert_eq!(classification.frame, detection.frame);
        assert_eq!(classification.objects[0].class_label, "human");
        assert_eq!(classification.objects[1].class_label, "unknown");
    }
}
